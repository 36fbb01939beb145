//! Wire-format constants and the error vocabulary shared by the ivshmem
//! doorbell core. No I/O happens in this crate; `ivshmem-core` does the work.

mod error;
mod windows_ioctl;
mod wire;

pub use error::{ErrorKind, IvshmemError, Status};
pub use wire::{
    DOORBELL_PAYLOAD, DOORBELL_RECV_TIMEOUT, MAX_PEER_ID, MAX_SOCKET_PATH_LEN, PACKET_SIZE,
    PROTOCOL_VERSION, SERVER_RECV_TIMEOUT, SHMEM_MAGIC,
};

/// Data-only summary of the Windows PCI driver's ioctl surface. See the
/// module docs for why this is here and why it is not `cfg(windows)`.
pub mod windows {
    pub use crate::windows_ioctl::*;
}
