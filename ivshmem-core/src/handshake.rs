//! The ivshmem-doorbell client handshake state machine.
//!
//! Runs four steps in sequence over an already-connected, timeout-armed
//! control socket: protocol version, self peer id, shared-memory
//! descriptor, then a flood of per-peer vector descriptors terminated by
//! either a receive timeout or a disconnect notice for our own id.

use ivshmem_proto::{ErrorKind, MAX_PEER_ID, PROTOCOL_VERSION, SHMEM_MAGIC, Status};
use std::os::fd::{OwnedFd, RawFd};

use crate::codec::{Packet, read_packet};
use crate::mapping::ShmemMapping;
use crate::registry::Registry;

/// Everything the handshake produces: the caller's own id and vectors, the
/// mapped shared region, and a populated registry of the peers that were
/// already connected when we joined.
pub struct HandshakeOutcome {
    pub peer_id: u16,
    pub self_vectors: Vec<OwnedFd>,
    pub mapping: ShmemMapping,
    pub registry: Registry,
}

fn peer_id_from_i64(value: i64) -> Result<u16, Status> {
    if value < 0 || value > MAX_PEER_ID {
        return Err(Status::combine(ErrorKind::PeerInvalid, 0));
    }
    Ok(value as u16)
}

/// Run the handshake over `sock_fd`, which the caller has already connected
/// and armed with `SO_RCVTIMEO` (done in `connection.rs`). On any error the
/// caller is responsible for tearing the socket down; this function only
/// owns resources it has itself allocated (vectors read off the wire, the
/// registry, the mapping).
pub fn run(sock_fd: RawFd) -> Result<HandshakeOutcome, Status> {
    // Step 1: protocol version. Any accompanying fd (a protocol violation)
    // is silently dropped.
    let version = match read_packet(sock_fd)? {
        Packet::Payload(v) | Packet::PayloadWithFd(v, _) => v,
        Packet::Timeout => return Err(Status::combine(ErrorKind::PacketTimeout, 0)),
    };
    if version != PROTOCOL_VERSION {
        return Err(Status::combine(ErrorKind::UnknownProtocolVersion, 0));
    }

    // Step 2: our own peer id.
    let self_id_raw = match read_packet(sock_fd)? {
        Packet::Payload(v) | Packet::PayloadWithFd(v, _) => v,
        Packet::Timeout => return Err(Status::combine(ErrorKind::PacketTimeout, 0)),
    };
    let self_peer_id = peer_id_from_i64(self_id_raw)?;

    // Step 3: the shared-memory descriptor, tagged with the all-ones magic.
    let shmem_fd = match read_packet(sock_fd)? {
        Packet::PayloadWithFd(v, fd) => {
            if v != SHMEM_MAGIC {
                return Err(Status::combine(ErrorKind::UnexpectedPacket, 0));
            }
            fd
        }
        Packet::Payload(_) => return Err(Status::combine(ErrorKind::FdMissing, 0)),
        Packet::Timeout => return Err(Status::combine(ErrorKind::PacketTimeout, 0)),
    };

    // Step 4: drain the peer/vector table. The server lists every
    // currently-connected peer's vectors, then our own, in runs grouped by
    // peer id; the drain ends either at a receive timeout (the protocol has
    // no explicit terminator) or at a disconnect notice naming our own id.
    let mut self_vectors = Vec::new();
    let registry = Registry::new();
    let mut last_peer_seen: Option<u16> = None;

    loop {
        match read_packet(sock_fd)? {
            Packet::Timeout => break,

            Packet::Payload(raw) => {
                // A disconnect notice: someone left while we were still
                // draining the table.
                let peer_id = peer_id_from_i64(raw)?;
                if peer_id == self_peer_id {
                    return Err(Status::combine(ErrorKind::OwnPeerClosed, 0));
                }
                if registry.remove(peer_id).is_none() {
                    return Err(Status::combine(ErrorKind::ClosedUnknownPeer, 0));
                }
                // A disconnect notice is the definitive end of the drain:
                // it only ever arrives once the server has finished
                // listing everyone else.
                break;
            }

            Packet::PayloadWithFd(raw, fd) => {
                let peer_id = peer_id_from_i64(raw)?;

                if peer_id == self_peer_id {
                    self_vectors.push(fd);
                    last_peer_seen = Some(peer_id);
                    continue;
                }

                if last_peer_seen != Some(peer_id) {
                    // First vector of a new run for this peer. A peer id
                    // reappearing out of its run is a duplicate-peer
                    // protocol violation.
                    if registry.contains(peer_id) {
                        return Err(Status::combine(ErrorKind::DuplicatePeer, 0));
                    }
                    registry.add(crate::registry::Peer::new(peer_id));
                }
                last_peer_seen = Some(peer_id);

                registry.with_peer_mut(peer_id, |peer| {
                    peer.vector_fds.push(crate::registry::VectorSlot::Open(fd))
                });
            }
        }
    }

    let mapping = ShmemMapping::from_fd(shmem_fd)?;

    Ok(HandshakeOutcome {
        peer_id: self_peer_id,
        self_vectors,
        mapping,
        registry,
    })
}
