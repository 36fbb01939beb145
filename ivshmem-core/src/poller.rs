//! The server-socket event poller: disconnect notices and new vectors for
//! peers that join after the handshake has finished.

use ivshmem_proto::{ErrorKind, MAX_PEER_ID, Status};
use std::os::fd::RawFd;

use crate::codec::{Packet, read_packet};
use crate::registry::{Peer, Registry};

/// One event observed on the server control socket after the handshake.
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    /// `peer_id` disconnected; it has already been removed from the
    /// registry by the time this is returned.
    PeerLeft { peer_id: u16 },
    /// `peer_id` (possibly just-created) was handed a new vector
    /// descriptor; `vector_index` is the peer's post-event vector count
    /// (spec's `new_count`, not a zero-based array index).
    PeerVectorAdded { peer_id: u16, vector_index: usize },
}

/// Block (up to the socket's configured receive timeout) for the next
/// server event and apply it to `registry`. Returns `POLL_SERVER_TIMEOUT`
/// if nothing arrived in time.
pub fn poll_once(sock_fd: RawFd, registry: &Registry) -> Result<Event, Status> {
    match read_packet(sock_fd)? {
        Packet::Timeout => Err(Status::combine(ErrorKind::PollServerTimeout, libc::EAGAIN)),

        Packet::Payload(raw) => {
            let peer_id = peer_id_from_i64(raw)?;
            if registry.remove(peer_id).is_none() {
                return Err(Status::combine(ErrorKind::PeerDoesntExist, 0));
            }
            Ok(Event::PeerLeft { peer_id })
        }

        Packet::PayloadWithFd(raw, fd) => {
            let peer_id = peer_id_from_i64(raw)?;

            // `deny_new_vectors` is sticky: once an allocation failure drops
            // a vector on the floor for this peer, every later vector for
            // it is refused too, since the vector array has lost its
            // positional correspondence with the server's own numbering.
            // This is the already-denied path, not the allocation-failure
            // path itself, so it reports plain `ERROR`, not `OUT_OF_MEMORY`.
            let denied = registry
                .with_peer(peer_id, |peer| peer.deny_new_vectors)
                .unwrap_or(false);
            if denied {
                drop(fd);
                return Err(Status::combine(ErrorKind::Error, 0));
            }

            let count = registry.get_or_insert_mut(peer_id, |peer: &mut Peer| {
                peer.vector_fds.push(crate::registry::VectorSlot::Open(fd));
                peer.vector_fds.len()
            });

            Ok(Event::PeerVectorAdded {
                peer_id,
                vector_index: count,
            })
        }
    }
}

fn peer_id_from_i64(value: i64) -> Result<u16, Status> {
    if value < 0 || value > MAX_PEER_ID {
        return Err(Status::combine(ErrorKind::PeerInvalid, 0));
    }
    Ok(value as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::{AsRawFd, FromRawFd};
    use std::os::unix::net::UnixStream;

    fn send_value(sock: &UnixStream, v: i64) {
        (&mut { sock }).write_all(&v.to_be_bytes()).unwrap();
    }

    #[test]
    fn disconnect_for_unknown_peer_is_an_error() {
        let (server, client) = UnixStream::pair().unwrap();
        client
            .set_read_timeout(Some(std::time::Duration::from_millis(200)))
            .unwrap();
        send_value(&server, 3);
        let registry = Registry::new();
        let err = poll_once(client.as_raw_fd(), &registry).unwrap_err();
        assert!(err.is(ErrorKind::PeerDoesntExist));
    }

    #[test]
    fn disconnect_for_known_peer_removes_it() {
        let (server, client) = UnixStream::pair().unwrap();
        client
            .set_read_timeout(Some(std::time::Duration::from_millis(200)))
            .unwrap();
        let registry = Registry::new();
        registry.add(Peer::new(3));
        send_value(&server, 3);
        let ev = poll_once(client.as_raw_fd(), &registry).unwrap();
        assert_eq!(ev, Event::PeerLeft { peer_id: 3 });
        assert!(!registry.contains(3));
    }

    #[test]
    fn timeout_maps_to_poll_server_timeout() {
        let (_server, client) = UnixStream::pair().unwrap();
        client
            .set_read_timeout(Some(std::time::Duration::from_millis(50)))
            .unwrap();
        let registry = Registry::new();
        let err = poll_once(client.as_raw_fd(), &registry).unwrap_err();
        assert!(err.is(ErrorKind::PollServerTimeout));
    }

    fn send_fd(sock: &UnixStream, v: i64, fd: RawFd) {
        let data = v.to_be_bytes();
        let iov = libc::iovec {
            iov_base: data.as_ptr() as *mut libc::c_void,
            iov_len: data.len(),
        };
        let cmsg_space =
            unsafe { libc::CMSG_SPACE(std::mem::size_of::<libc::c_int>() as u32) } as usize;
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

    fn pipe_fd() -> RawFd {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        fds[0]
    }

    #[test]
    fn new_vector_reports_post_event_count() {
        let (server, client) = UnixStream::pair().unwrap();
        client
            .set_read_timeout(Some(std::time::Duration::from_millis(200)))
            .unwrap();
        let registry = Registry::new();
        registry.add(Peer::new(3));
        registry
            .with_peer_mut(3, |p| {
                p.vector_fds
                    .push(crate::registry::VectorSlot::Open(unsafe {
                        std::os::fd::OwnedFd::from_raw_fd(pipe_fd())
                    }))
            })
            .unwrap();

        send_fd(&server, 3, pipe_fd());
        let ev = poll_once(client.as_raw_fd(), &registry).unwrap();
        assert_eq!(
            ev,
            Event::PeerVectorAdded {
                peer_id: 3,
                vector_index: 2,
            }
        );
    }

    #[test]
    fn new_vector_for_already_denied_peer_returns_plain_error() {
        let (server, client) = UnixStream::pair().unwrap();
        client
            .set_read_timeout(Some(std::time::Duration::from_millis(200)))
            .unwrap();
        let registry = Registry::new();
        registry.add(Peer::new(4));
        registry.with_peer_mut(4, |p| p.deny_new_vectors = true).unwrap();

        send_fd(&server, 4, pipe_fd());
        let err = poll_once(client.as_raw_fd(), &registry).unwrap_err();
        assert!(err.is(ErrorKind::Error));
        assert!(!err.is(ErrorKind::OutOfMemory));
    }
}
