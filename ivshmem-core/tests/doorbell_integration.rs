//! End-to-end tests driving `Connection::connect` against a scripted
//! in-process server, rather than unit-testing the handshake state machine
//! in isolation.

use ivshmem_core::{ConnectOptions, Connection};
use ivshmem_proto::{ErrorKind, PROTOCOL_VERSION, SHMEM_MAGIC};
use std::io::Write;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::thread;
use std::time::Duration;

fn send_value(sock: &UnixStream, v: i64) {
    (&mut { sock }).write_all(&v.to_be_bytes()).unwrap();
}

fn send_fd(sock: &UnixStream, v: i64, fd: RawFd) {
    let data = v.to_be_bytes();
    let iov = libc::iovec {
        iov_base: data.as_ptr() as *mut libc::c_void,
        iov_len: data.len(),
    };
    let cmsg_space = unsafe { libc::CMSG_SPACE(std::mem::size_of::<libc::c_int>() as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];
    let mut msg = libc::msghdr {
        msg_name: std::ptr::null_mut(),
        msg_namelen: 0,
        msg_iov: &iov as *const _ as *mut _,
        msg_iovlen: 1,
        msg_control: cmsg_buf.as_mut_ptr() as *mut libc::c_void,
        msg_controllen: cmsg_buf.len() as _,
        msg_flags: 0,
    };
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        let hdr = &mut *cmsg;
        hdr.cmsg_level = libc::SOL_SOCKET;
        hdr.cmsg_type = libc::SCM_RIGHTS;
        hdr.cmsg_len = libc::CMSG_LEN(std::mem::size_of::<libc::c_int>() as u32) as _;
        std::ptr::write_unaligned(libc::CMSG_DATA(cmsg) as *mut libc::c_int, fd);
        let n = libc::sendmsg(sock.as_raw_fd(), &mut msg, 0);
        assert!(n > 0);
    }
}

fn shmem_fd(size: usize) -> OwnedFd {
    let f = tempfile::tempfile().unwrap();
    f.set_len(size as u64).unwrap();
    unsafe { OwnedFd::from_raw_fd(f.into_raw_fd()) }
}

fn pipe_pair() -> (OwnedFd, OwnedFd) {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

fn socket_path(name: &str) -> std::path::PathBuf {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    // Leak the tempdir for the lifetime of the test process; the OS cleans
    // it up on reboot and CI workspaces are ephemeral anyway.
    std::mem::forget(dir);
    path
}

#[test]
fn connect_drains_peer_table_and_then_reports_disconnect() {
    let path = socket_path("handshake.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let server = thread::spawn(move || {
        let (server_sock, _) = listener.accept().unwrap();
        send_value(&server_sock, PROTOCOL_VERSION);
        send_value(&server_sock, 5);
        send_fd(&server_sock, SHMEM_MAGIC, shmem_fd(4096).as_raw_fd());
        send_fd(&server_sock, 3, shmem_fd(8).as_raw_fd());
        // Let the drain time out, then announce peer 3 leaving.
        thread::sleep(Duration::from_millis(2_200));
        send_value(&server_sock, 3);
        server_sock
    });

    let conn = Connection::connect(&ConnectOptions::new(path.as_path())).unwrap();
    assert_eq!(conn.peer_id(), 5);
    assert_eq!(conn.peers(), vec![3]);

    let event = conn.poll_events().unwrap();
    assert_eq!(event, ivshmem_core::Event::PeerLeft { peer_id: 3 });
    assert!(conn.peers().is_empty());

    server.join().unwrap();
}

#[test]
fn disconnect_of_non_self_peer_during_drain_removes_it_and_completes_handshake() {
    let path = socket_path("drain-disconnect.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let server = thread::spawn(move || {
        let (server_sock, _) = listener.accept().unwrap();
        send_value(&server_sock, PROTOCOL_VERSION);
        send_value(&server_sock, 5);
        send_fd(&server_sock, SHMEM_MAGIC, shmem_fd(16).as_raw_fd());
        send_fd(&server_sock, 3, shmem_fd(8).as_raw_fd());
        send_value(&server_sock, 3); // peer 3 disconnects before the drain ends
        server_sock
    });

    let conn = Connection::connect(&ConnectOptions::new(path.as_path())).unwrap();
    assert_eq!(conn.peer_id(), 5);
    assert!(conn.peers().is_empty());

    server.join().unwrap();
}

#[test]
fn two_real_connections_exchange_a_doorbell() {
    let path = socket_path("doorbell-roundtrip.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let server = thread::spawn(move || {
        let (sock_a, _) = listener.accept().unwrap();
        let (sock_b, _) = listener.accept().unwrap();

        // One shared region, fstat'd independently by each client.
        let region_a = shmem_fd(64);
        let region_b = unsafe {
            OwnedFd::from_raw_fd(libc::dup(region_a.as_raw_fd()))
        };

        // One pipe models one vector: the write end is peer B's vector as
        // seen by A, the read end is B's own vector.
        let (vector_read, vector_write) = pipe_pair();

        send_value(&sock_a, PROTOCOL_VERSION);
        send_value(&sock_a, 1);
        send_fd(&sock_a, SHMEM_MAGIC, region_a.as_raw_fd());
        send_fd(&sock_a, 2, vector_write.as_raw_fd());

        send_value(&sock_b, PROTOCOL_VERSION);
        send_value(&sock_b, 2);
        send_fd(&sock_b, SHMEM_MAGIC, region_b.as_raw_fd());
        send_fd(&sock_b, 2, vector_read.as_raw_fd());

        thread::sleep(Duration::from_millis(2_200));
        (sock_a, sock_b)
    });

    let conn_a = Connection::connect(&ConnectOptions::new(path.as_path())).unwrap();
    let conn_b = Connection::connect(&ConnectOptions::new(path.as_path())).unwrap();

    assert_eq!(conn_a.vector_count_of(2), Some(1));

    conn_a.send_interrupt(2, 0).unwrap();
    let hits = conn_b.poll_interrupt().unwrap();
    assert_eq!(hits, vec![0]);

    let self_err = conn_a.send_interrupt(conn_a.peer_id(), 0).unwrap_err();
    assert!(self_err.is(ErrorKind::InterruptCantSelfInterrupt));

    server.join().unwrap();
}
