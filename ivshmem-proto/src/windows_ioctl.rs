//! Data-only summary of the Windows PCI ivshmem driver's ioctl surface.
//!
//! The kernel side of the driver is a given; the binding layer that would
//! call `DeviceIoControl` against it lives outside this crate. This module
//! exists so a future binding layer has one source of truth for the
//! numeric contract. No Windows API is called here; it compiles on every
//! target.

const FILE_DEVICE_UNKNOWN: u32 = 0x22;
const METHOD_BUFFERED: u32 = 0;
const FILE_ANY_ACCESS: u32 = 0;

/// `CTL_CODE(DeviceType, Function, Method, Access)`.
macro_rules! ctl_code {
    ($dev:expr, $func:expr, $method:expr, $access:expr) => {
        ($dev << 16) | ($access << 14) | ($func << 2) | $method
    };
}

/// Query the size (in bytes) of the shared region backing a PCI device.
pub const IOCTL_IVSHMEM_REQUEST_SIZE: u32 =
    ctl_code!(FILE_DEVICE_UNKNOWN, 0x900, METHOD_BUFFERED, FILE_ANY_ACCESS);

/// Request a mapping of the shared region into the caller's address space.
pub const IOCTL_IVSHMEM_REQUEST_MMAP: u32 =
    ctl_code!(FILE_DEVICE_UNKNOWN, 0x901, METHOD_BUFFERED, FILE_ANY_ACCESS);

/// Release a previously requested mapping.
pub const IOCTL_IVSHMEM_RELEASE_MMAP: u32 =
    ctl_code!(FILE_DEVICE_UNKNOWN, 0x902, METHOD_BUFFERED, FILE_ANY_ACCESS);

/// Fire a doorbell on a given (peer, vector) pair.
pub const IOCTL_IVSHMEM_TRIGGER_INTERRUPT: u32 =
    ctl_code!(FILE_DEVICE_UNKNOWN, 0x903, METHOD_BUFFERED, FILE_ANY_ACCESS);

/// Register an auto-reset event object to be signalled when a given local
/// vector fires.
pub const IOCTL_IVSHMEM_REGISTER_INTERRUPT_WAIT: u32 =
    ctl_code!(FILE_DEVICE_UNKNOWN, 0x904, METHOD_BUFFERED, FILE_ANY_ACCESS);

/// Upper bound on interrupt vectors the PCI variant exposes per device.
pub const MAX_VECTORS_PER_DEVICE: usize = 32;

/// Doorbell-receive wait timeout used by the PCI variant (shorter than the
/// Linux doorbell-receive default because event objects wake immediately on
/// signal rather than requiring a poll loop).
pub const PCI_DOORBELL_RECV_TIMEOUT_MS: u32 = 1_000;
