//! Client-side runtime for the QEMU ivshmem-doorbell protocol: connect to a
//! server control socket, track peers and their interrupt vectors, and read
//! or write the mapped shared-memory region with bounds-checked scalar and
//! atomic accessors.
//!
//! This crate implements only the client half of the protocol: no
//! server-side listener, no cross-peer data replication beyond what the
//! shared mapping itself provides, and no ordering or delivery guarantees
//! stronger than a best-effort doorbell wakeup.

pub mod atomics;
pub mod codec;
pub mod connection;
pub mod doorbell;
pub mod handshake;
pub mod mapping;
pub mod poller;
pub mod registry;
pub mod view;

pub use connection::{ConnectOptions, Connection};
pub use mapping::{PlainMapping, PlainMappingOptions, ShmemMapping};
pub use poller::Event;
pub use registry::{Peer, Registry, VectorSlot};
pub use view::View;

pub use ivshmem_proto::{ErrorKind, IvshmemError, Status};
