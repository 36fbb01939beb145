//! The closed error vocabulary shared by every fallible core operation.
//!
//! A result is never thrown, it is a 64-bit value combining a `kind` and a
//! `detail` (usually an OS errno). `Status` is that value; `ErrorKind` is the
//! closed enumeration of `kind`s it can carry.

use std::fmt;

/// The closed set of result categories. Numeric values are stable across
/// releases so that a binding layer translating this crate's `Status` into
/// a managed-runtime error code needs no lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[repr(i32)]
pub enum ErrorKind {
    #[error("ok")]
    Ok = 0,
    /// Internal marker meaning "packet carried an ancillary descriptor".
    /// Never surfaced to a caller as a failure.
    #[error("fd")]
    Fd = 1,
    #[error("packet shorter than 8 bytes")]
    PacketTooShort = 2,
    #[error("read error")]
    ReadError = 3,
    #[error("unknown ivshmem protocol version")]
    UnknownProtocolVersion = 4,
    #[error("expected packet to carry a file descriptor")]
    FdMissing = 5,
    #[error("unexpected packet")]
    UnexpectedPacket = 6,
    #[error("peer id out of range")]
    PeerInvalid = 7,
    #[error("error creating unix socket")]
    ErrorCreatingUnixSocket = 8,
    #[error("invalid device path")]
    InvalidDevicePath = 9,
    #[error("error connecting unix socket")]
    ErrorConnectingUnixSocket = 10,
    #[error("mutex init error")]
    MutexInitError = 11,
    #[error("error setting receive timeout on unix socket")]
    ErrorSettingTimeoutOnUnixSocket = 12,
    #[error("packet receive timed out")]
    PacketTimeout = 13,
    #[error("disconnect notification for unknown peer")]
    ClosedUnknownPeer = 14,
    #[error("server closed our own peer id")]
    OwnPeerClosed = 15,
    #[error("duplicate peer")]
    DuplicatePeer = 16,
    #[error("cannot interrupt self")]
    InterruptCantSelfInterrupt = 17,
    #[error("peer doesn't exist")]
    PeerDoesntExist = 18,
    #[error("vector index too big")]
    InterruptVectorTooBig = 19,
    #[error("vector descriptor closed")]
    InterruptVectorClosed = 20,
    #[error("interrupt send error")]
    InterruptSendError = 21,
    #[error("interrupt receive error")]
    InterruptReceiveError = 22,
    #[error("no vectors to receive on")]
    InterruptReceiveNoVectors = 23,
    #[error("fstat on shared memory descriptor failed")]
    ErrorShmemFstat = 24,
    #[error("interrupt wait timed out")]
    InterruptTimeout = 25,
    #[error("mmap of shared memory failed")]
    ErrorShmemMmap = 26,
    #[error("server poll timed out")]
    PollServerTimeout = 27,
    #[error("invalid arguments")]
    InvalidArguments = 28,
    #[error("invalid connection pointer")]
    InvalidConnectionPointer = 29,
    #[error("peer not found")]
    PeerNotFound = 30,
    #[error("caller buffer out of bounds")]
    BufferOutOfBounds = 31,
    #[error("shared memory offset out of bounds")]
    MemoryOutOfBounds = 32,
    #[error("failed to grow backing file to requested size")]
    ErrorShmemFileSetSize = 33,
    #[error("compare-and-set mismatch")]
    CmpxchgFailed = 34,
    #[error("open failed")]
    OpenFailure = 35,
    /// Windows-only: reserved for the external PCI driver collaborator.
    #[error("mapped size changed underneath us")]
    ErrorMmapSizeChanged = 36,
    /// Windows-only: reserved for the external PCI driver collaborator.
    #[error("failed to create interrupt event object")]
    InterruptCreateEventFailure = 37,
    /// Windows-only: reserved for the external PCI driver collaborator.
    #[error("failed to register interrupt event with the driver")]
    InterruptEventRegisterFailure = 38,
    /// Windows-only: reserved for the external PCI driver collaborator.
    #[error("error enumerating PCI devices")]
    EnumeratePciDeviceError = 39,
    /// Windows-only: reserved for the external PCI driver collaborator.
    #[error("error opening PCI device handle")]
    OpenPciDeviceHandleError = 40,
    /// Windows-only: reserved for the external PCI driver collaborator.
    #[error("too many matching PCI devices")]
    TooManyPciDevices = 41,
    #[error("out of memory")]
    OutOfMemory = 999,
    #[error("unspecified error")]
    Error = 998,
}

impl ErrorKind {
    /// Reconstruct a kind from the raw numeric value embedded in a [`Status`].
    /// Unknown values fall back to [`ErrorKind::Error`] rather than panicking,
    /// since a `Status` may in principle be round-tripped across a process
    /// boundary by a caller running an older version of this crate.
    fn from_raw(raw: i32) -> Self {
        use ErrorKind::*;
        match raw {
            0 => Ok,
            1 => Fd,
            2 => PacketTooShort,
            3 => ReadError,
            4 => UnknownProtocolVersion,
            5 => FdMissing,
            6 => UnexpectedPacket,
            7 => PeerInvalid,
            8 => ErrorCreatingUnixSocket,
            9 => InvalidDevicePath,
            10 => ErrorConnectingUnixSocket,
            11 => MutexInitError,
            12 => ErrorSettingTimeoutOnUnixSocket,
            13 => PacketTimeout,
            14 => ClosedUnknownPeer,
            15 => OwnPeerClosed,
            16 => DuplicatePeer,
            17 => InterruptCantSelfInterrupt,
            18 => PeerDoesntExist,
            19 => InterruptVectorTooBig,
            20 => InterruptVectorClosed,
            21 => InterruptSendError,
            22 => InterruptReceiveError,
            23 => InterruptReceiveNoVectors,
            24 => ErrorShmemFstat,
            25 => InterruptTimeout,
            26 => ErrorShmemMmap,
            27 => PollServerTimeout,
            28 => InvalidArguments,
            29 => InvalidConnectionPointer,
            30 => PeerNotFound,
            31 => BufferOutOfBounds,
            32 => MemoryOutOfBounds,
            33 => ErrorShmemFileSetSize,
            34 => CmpxchgFailed,
            35 => OpenFailure,
            36 => ErrorMmapSizeChanged,
            37 => InterruptCreateEventFailure,
            38 => InterruptEventRegisterFailure,
            39 => EnumeratePciDeviceError,
            40 => OpenPciDeviceHandleError,
            41 => TooManyPciDevices,
            999 => OutOfMemory,
            _ => Error,
        }
    }
}

/// A 64-bit (kind, detail) carrier. `detail` is usually an OS errno captured
/// at the point of failure, zero when there isn't one. This is the return
/// type of every fallible core operation; it is a value, not an exception.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Status(u64);

impl Status {
    /// Combine a kind and a detail (commonly `errno`) into one carrier.
    /// `detail` occupies the low 32 bits, `kind` the high 32 bits.
    pub fn combine(kind: ErrorKind, detail: i32) -> Self {
        let kind_bits = (kind as i32) as u32 as u64;
        let detail_bits = detail as u32 as u64;
        Status((kind_bits << 32) | detail_bits)
    }

    /// The success status, detail 0.
    pub const fn ok() -> Self {
        Status(0)
    }

    /// Extract the `kind` half.
    pub fn kind(self) -> ErrorKind {
        ErrorKind::from_raw((self.0 >> 32) as i32)
    }

    /// Extract the `detail` half (0 when absent).
    pub fn detail(self) -> i32 {
        (self.0 & 0xFFFF_FFFF) as i32
    }

    /// Compare only the `kind` half against `kind`, ignoring detail.
    pub fn is(self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }

    pub fn is_ok(self) -> bool {
        self.is(ErrorKind::Ok)
    }

    /// The raw packed representation, for callers that need to hand this
    /// value across an FFI boundary untouched.
    pub fn into_raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Status(raw)
    }

    /// Turn this status into a `Result`, mapping `Ok` to `Ok(())` and
    /// anything else to `Err(IvshmemError)`.
    pub fn into_result(self) -> Result<(), IvshmemError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(IvshmemError(self))
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Status")
            .field("kind", &self.kind())
            .field("detail", &self.detail())
            .finish()
    }
}

/// `Status` wearing a `std::error::Error` face, for use with `?` in code
/// that wants idiomatic `Result<T, E>` rather than the raw carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvshmemError(Status);

impl IvshmemError {
    pub fn status(self) -> Status {
        self.0
    }

    pub fn kind(self) -> ErrorKind {
        self.0.kind()
    }
}

impl From<Status> for IvshmemError {
    fn from(s: Status) -> Self {
        IvshmemError(s)
    }
}

impl fmt::Display for IvshmemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.detail() != 0 {
            write!(
                f,
                "{} (errno {})",
                self.0.kind(),
                self.0.detail()
            )
        } else {
            write!(f, "{}", self.0.kind())
        }
    }
}

impl std::error::Error for IvshmemError {}
