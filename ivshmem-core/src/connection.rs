//! The top-level `Connection`: owns the control socket, the mapped region,
//! the registry, and our own peer state, and ties the handshake/poller/
//! doorbell components together behind one handle.

use ivshmem_proto::{ErrorKind, MAX_SOCKET_PATH_LEN, SERVER_RECV_TIMEOUT, Status};
use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::doorbell;
use crate::handshake;
use crate::mapping::ShmemMapping;
use crate::poller::{self, Event};
use crate::registry::Registry;
use crate::view::View;

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Options for [`Connection::connect`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub socket_path: PathBuf,
}

impl ConnectOptions {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        ConnectOptions {
            socket_path: socket_path.into(),
        }
    }
}

/// A live ivshmem-doorbell client connection: one mapped shared region, our
/// own peer id and vectors, and a registry of the other peers currently on
/// the bus.
pub struct Connection {
    sock: Option<OwnedFd>,
    peer_id: u16,
    self_vectors: Vec<OwnedFd>,
    mapping: ShmemMapping,
    registry: Registry,
    closed: AtomicBool,
}

fn open_socket(path: &Path) -> Result<OwnedFd, Status> {
    let bytes = path.as_os_str().as_bytes();
    if bytes.len() >= MAX_SOCKET_PATH_LEN {
        return Err(Status::combine(ErrorKind::InvalidDevicePath, 0));
    }

    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(Status::combine(ErrorKind::ErrorCreatingUnixSocket, errno()));
    }
    // SAFETY: `fd` was just created by `socket(2)` and is not yet owned
    // elsewhere.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let timeout = libc::timeval {
        tv_sec: SERVER_RECV_TIMEOUT.as_secs() as libc::time_t,
        tv_usec: 0,
    };
    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &timeout as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(Status::combine(
            ErrorKind::ErrorSettingTimeoutOnUnixSocket,
            errno(),
        ));
    }

    let c_path = CString::new(bytes).map_err(|_| Status::combine(ErrorKind::InvalidDevicePath, 0))?;
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    let path_bytes = c_path.as_bytes_with_nul();
    // SAFETY: `path_bytes.len() <= MAX_SOCKET_PATH_LEN <= sun_path.len()`,
    // checked above.
    unsafe {
        std::ptr::copy_nonoverlapping(
            path_bytes.as_ptr() as *const libc::c_char,
            addr.sun_path.as_mut_ptr(),
            path_bytes.len(),
        );
    }

    let ret = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            &addr as *const libc::sockaddr_un as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(Status::combine(
            ErrorKind::ErrorConnectingUnixSocket,
            errno(),
        ));
    }

    Ok(fd)
}

impl Connection {
    /// Connect to the ivshmem-doorbell server at `opts.socket_path` and run
    /// the handshake to completion. On any failure, every resource
    /// allocated so far (socket, vectors, mapping) is released before the
    /// error is returned.
    pub fn connect(opts: &ConnectOptions) -> Result<Self, Status> {
        let sock = open_socket(&opts.socket_path)?;

        let outcome = match handshake::run(sock.as_raw_fd()) {
            Ok(o) => o,
            Err(e) => {
                // `sock` drops here, closing the fd; no other resources
                // were allocated yet at handshake failure.
                return Err(e);
            }
        };

        log::info!(
            "ivshmem handshake complete: peer_id={}, {} self vector(s), {} other peer(s), {} byte region",
            outcome.peer_id,
            outcome.self_vectors.len(),
            outcome.registry.len(),
            outcome.mapping.len(),
        );

        Ok(Connection {
            sock: Some(sock),
            peer_id: outcome.peer_id,
            self_vectors: outcome.self_vectors,
            mapping: outcome.mapping,
            registry: outcome.registry,
            closed: AtomicBool::new(false),
        })
    }

    pub fn peer_id(&self) -> u16 {
        self.peer_id
    }

    pub fn view(&self) -> &View {
        self.mapping.view()
    }

    pub fn mapping_len(&self) -> u64 {
        self.mapping.len()
    }

    /// Ids of every other peer currently known to be connected.
    pub fn peers(&self) -> Vec<u16> {
        self.registry.peer_ids()
    }

    pub fn vector_count_of(&self, peer_id: u16) -> Option<usize> {
        self.registry.with_peer(peer_id, |p| p.vector_fds.len())
    }

    /// Block for the next server-socket event (join/leave/new-vector) and
    /// apply it to the registry.
    pub fn poll_events(&self) -> Result<Event, Status> {
        let fd = self
            .sock
            .as_ref()
            .ok_or_else(|| Status::combine(ErrorKind::InvalidConnectionPointer, 0))?;
        poller::poll_once(fd.as_raw_fd(), &self.registry)
    }

    /// Fire `vector` on `peer`.
    pub fn send_interrupt(&self, peer: u16, vector: u16) -> Result<(), Status> {
        doorbell::send_interrupt(self.peer_id, &self.registry, peer, vector)
    }

    /// Block for a doorbell on one of our own vectors. Returns the indices
    /// (into our own vector list) that fired.
    pub fn poll_interrupt(&self) -> Result<Vec<usize>, Status> {
        doorbell::poll_interrupt(&self.self_vectors)
    }

    /// Explicit, idempotent teardown. `Drop` calls this too, so using it
    /// directly is only necessary when the caller wants to release the
    /// connection's resources deterministically ahead of scope exit.
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.mapping.view().mark_closed();
        self.sock = None; // closes the fd via OwnedFd's Drop
        log::debug!("closed ivshmem connection (peer_id={})", self.peer_id);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
