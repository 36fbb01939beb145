//! Fixed-width packet codec for the ivshmem-doorbell server protocol.
//!
//! Every message is exactly 8 bytes carrying one `i64` in network (big-endian)
//! byte order, optionally accompanied by one ancillary file descriptor via
//! `SCM_RIGHTS`. Endianness conversion only matters on little-endian hosts;
//! using `from_be_bytes`/`to_be_bytes` throughout gives exactly that: a
//! no-op on big-endian hosts, a real byte swap on little-endian ones.

use ivshmem_proto::{ErrorKind, PACKET_SIZE, Status};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

/// The result of reading one packet off the server socket.
pub enum Packet {
    /// 8 bytes, no ancillary descriptor.
    Payload(i64),
    /// 8 bytes, plus exactly one ancillary descriptor.
    PayloadWithFd(i64, OwnedFd),
    /// The socket receive timeout elapsed before 8 bytes arrived.
    Timeout,
}

/// Read one packet from `sock_fd`, which must have `SO_RCVTIMEO` already set.
/// Returns `Err` for every fatal condition: a short non-zero read
/// (`PACKET_TOO_SHORT`), an orderly zero-byte close mid-stream
/// (`READ_ERROR`), or any other `recvmsg` failure (`READ_ERROR` with errno).
pub fn read_packet(sock_fd: RawFd) -> Result<Packet, Status> {
    let mut data = [0u8; PACKET_SIZE];
    // Room for exactly one fd's worth of ancillary data: the wire format
    // carries at most one descriptor per packet.
    let cmsg_space = unsafe { libc::CMSG_SPACE(std::mem::size_of::<libc::c_int>() as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut iov = libc::iovec {
        iov_base: data.as_mut_ptr() as *mut libc::c_void,
        iov_len: data.len(),
    };
    let mut msg = libc::msghdr {
        msg_name: std::ptr::null_mut(),
        msg_namelen: 0,
        msg_iov: &mut iov,
        msg_iovlen: 1,
        msg_control: cmsg_buf.as_mut_ptr() as *mut libc::c_void,
        msg_controllen: cmsg_buf.len() as _,
        msg_flags: 0,
    };

    let n = unsafe { libc::recvmsg(sock_fd, &mut msg, 0) };
    if n < 0 {
        let err = std::io::Error::last_os_error();
        let raw = err.raw_os_error().unwrap_or(0);
        return match err.kind() {
            std::io::ErrorKind::WouldBlock => Ok(Packet::Timeout),
            _ => Err(Status::combine(ErrorKind::ReadError, raw)),
        };
    }

    if n == 0 {
        // Orderly close mid-handshake/mid-poll: the server hung up.
        return Err(Status::combine(ErrorKind::ReadError, 0));
    }

    if (n as usize) < PACKET_SIZE {
        return Err(Status::combine(ErrorKind::PacketTooShort, 0));
    }

    let value = i64::from_be_bytes(data);

    let mut fd: Option<OwnedFd> = None;
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            let hdr = &*cmsg;
            if hdr.cmsg_level == libc::SOL_SOCKET
                && hdr.cmsg_type == libc::SCM_RIGHTS
                && hdr.cmsg_len as usize >= libc::CMSG_LEN(std::mem::size_of::<libc::c_int>() as u32) as usize
            {
                let raw_fd: libc::c_int =
                    std::ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const libc::c_int);
                fd = Some(OwnedFd::from_raw_fd(raw_fd));
                break;
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok(match fd {
        Some(fd) => Packet::PayloadWithFd(value, fd),
        None => Packet::Payload(value),
    })
}

/// Write the fixed 8-byte doorbell payload to a vector descriptor. Host
/// endianness: a vector descriptor is a local eventfd-like object, not a
/// wire socket.
pub fn write_doorbell(vector_fd: RawFd) -> Result<(), Status> {
    let payload = ivshmem_proto::DOORBELL_PAYLOAD.to_ne_bytes();
    let n = unsafe { libc::write(vector_fd, payload.as_ptr() as *const libc::c_void, payload.len()) };
    if n as usize != payload.len() {
        let raw = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        return Err(Status::combine(ErrorKind::InterruptSendError, raw));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use std::os::fd::AsRawFd;

    #[test]
    fn reads_plain_payload() {
        let (a, b) = UnixStream::pair().unwrap();
        std::io::Write::write_all(&mut { &a }, &5i64.to_be_bytes()).unwrap();
        match read_packet(b.as_raw_fd()).unwrap() {
            Packet::Payload(v) => assert_eq!(v, 5),
            _ => panic!("expected plain payload"),
        }
    }

    #[test]
    fn wire_value_is_big_endian_regardless_of_host() {
        let (a, b) = UnixStream::pair().unwrap();
        // 1 encoded big-endian has its nonzero byte last, not first.
        std::io::Write::write_all(&mut { &a }, &1i64.to_be_bytes()).unwrap();
        match read_packet(b.as_raw_fd()).unwrap() {
            Packet::Payload(v) => assert_eq!(v, 1),
            _ => panic!("expected plain payload"),
        }
    }

    #[test]
    fn reads_zero_close_as_read_error() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(a);
        let err = read_packet(b.as_raw_fd()).unwrap_err();
        assert!(err.is(ErrorKind::ReadError));
    }
}
