//! On-the-wire constants for the ivshmem-doorbell server protocol.
//!
//! Every message is an 8-byte big-endian (network order) payload,
//! optionally carrying one ancillary file descriptor. The byte-order
//! conversion only has an observable effect on little-endian hosts.

use std::time::Duration;

/// Size in bytes of one wire packet's fixed payload.
pub const PACKET_SIZE: usize = 8;

/// Handshake step 1: the only version this crate speaks.
pub const PROTOCOL_VERSION: i64 = 0;

/// Handshake step 3: all-ones marks the shared-memory descriptor packet.
pub const SHMEM_MAGIC: i64 = -1; // 0xFFFFFFFFFFFFFFFF as i64

/// Largest valid peer id (16 bits).
pub const MAX_PEER_ID: i64 = 0xFFFF;

/// Payload written to a vector descriptor to fire a doorbell. Host
/// endianness: a vector descriptor is a local object, not a wire socket.
pub const DOORBELL_PAYLOAD: u64 = 1;

/// Default receive timeout for the server control socket.
pub const SERVER_RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Default wait timeout for doorbell receive multiplexing.
pub const DOORBELL_RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Maximum `sockaddr_un.sun_path` length, including the NUL terminator.
pub const MAX_SOCKET_PATH_LEN: usize = 108;
