//! Doorbell send/receive: firing a peer's interrupt vector and waiting on
//! our own.
//!
//! Send multiplexes nothing — one targeted write under the registry mutex.
//! Receive multiplexes over our own vector descriptors with `libc::poll`,
//! the natural replacement for a hand-tracked highest-fd `select(2)` set
//! when the fd count is unbounded.

use ivshmem_proto::{DOORBELL_RECV_TIMEOUT, ErrorKind, Status};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use crate::codec::write_doorbell;
use crate::registry::Registry;

/// Fire `vector` on `peer`. Fails fast if `peer` is ourselves. The write
/// itself happens while still holding the registry mutex, so it cannot
/// race a concurrent disconnect that would otherwise close the descriptor
/// out from under it.
pub fn send_interrupt(
    self_peer_id: u16,
    registry: &Registry,
    peer: u16,
    vector: u16,
) -> Result<(), Status> {
    if peer == self_peer_id {
        return Err(Status::combine(ErrorKind::InterruptCantSelfInterrupt, 0));
    }

    let outcome = registry.with_peer(peer, |p| {
        let idx = vector as usize;
        let fd = match p.vector_fds.get(idx) {
            Some(slot) => slot
                .as_raw_fd()
                .ok_or_else(|| Status::combine(ErrorKind::InterruptVectorClosed, 0))?,
            None => return Err(Status::combine(ErrorKind::InterruptVectorTooBig, 0)),
        };
        write_doorbell(fd)
    });

    match outcome {
        None => Err(Status::combine(ErrorKind::PeerDoesntExist, 0)),
        Some(result) => result,
    }
}

/// Block up to [`ivshmem_proto::DOORBELL_RECV_TIMEOUT`] for an interrupt on
/// any of our own vectors. Returns the indices (into `self_vectors`) that
/// had a pending doorbell.
pub fn poll_interrupt(self_vectors: &[OwnedFd]) -> Result<Vec<usize>, Status> {
    if self_vectors.is_empty() {
        return Err(Status::combine(ErrorKind::InterruptReceiveNoVectors, 0));
    }

    let mut fds: Vec<libc::pollfd> = self_vectors
        .iter()
        .map(|fd| libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    let timeout_ms = DOORBELL_RECV_TIMEOUT.as_millis() as libc::c_int;
    let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };

    if ret == 0 {
        return Err(Status::combine(ErrorKind::InterruptTimeout, 0));
    }
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        let raw = err.raw_os_error().unwrap_or(0);
        if raw == libc::EINTR {
            return Err(Status::combine(ErrorKind::InterruptTimeout, libc::EINTR));
        }
        return Err(Status::combine(ErrorKind::InterruptReceiveError, raw));
    }

    let mut hit = Vec::new();
    for (i, pfd) in fds.iter().enumerate() {
        if pfd.revents & libc::POLLIN == 0 {
            continue;
        }
        if drain_one(pfd.fd) {
            hit.push(i);
        }
    }

    if hit.is_empty() {
        return Err(Status::combine(ErrorKind::InterruptReceiveError, 0));
    }

    Ok(hit)
}

/// Consume the fixed 8-byte doorbell payload from `fd`. A short read is
/// treated as "nothing actually arrived" and skipped.
fn drain_one(fd: RawFd) -> bool {
    let mut buf = [0u8; 8];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    n as usize == buf.len()
}
