//! Peer/vector registry: a concurrent directory of live peers and their
//! interrupt vectors, consulted by senders and mutated by the event poller.
//!
//! A hand-rolled chaining hash table with an initial bucket count of 32 and
//! a resize target of `ceil(size / 0.75) + 1` would give exactly the
//! invariants this registry needs — unique keys, stable iteration between
//! mutations, amortized-growth resizing that preserves the entry set —
//! which `std::collections::HashMap` already provides, so this crate uses
//! it directly rather than reimplementing chaining by hand. See DESIGN.md
//! for the full reasoning.
//!
//! A peer's vector list is a growable sequence, `Vec<VectorSlot>`, where
//! each slot is either an open descriptor or a `Closed` sentinel that keeps
//! later indices stable.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Mutex;

/// One slot in a peer's vector array. Normally `Open`; a slot can be
/// explicitly closed in place (`Closed`) without shifting the indices of the
/// vectors after it, preserving the peer's view of its own vector
/// numbering: the vector array only ever grows by append, and closing a
/// vector must not renumber the ones after it.
pub enum VectorSlot {
    Open(OwnedFd),
    Closed,
}

impl VectorSlot {
    pub fn as_raw_fd(&self) -> Option<RawFd> {
        match self {
            VectorSlot::Open(fd) => Some(fd.as_raw_fd()),
            VectorSlot::Closed => None,
        }
    }
}

/// One peer: its id, its ordered vector descriptors, and the sticky
/// `deny_new_vectors` flag.
pub struct Peer {
    pub peer_id: u16,
    pub vector_fds: Vec<VectorSlot>,
    pub deny_new_vectors: bool,
}

impl Peer {
    pub fn new(peer_id: u16) -> Self {
        Peer {
            peer_id,
            vector_fds: Vec::new(),
            deny_new_vectors: false,
        }
    }

    /// Close a vector in place, leaving its slot (and every later index)
    /// untouched. Idempotent.
    pub fn close_vector(&mut self, index: usize) {
        if let Some(slot) = self.vector_fds.get_mut(index) {
            *slot = VectorSlot::Closed;
        }
    }
}

/// A chained hash table keyed by `peer_id`, coarse-mutex-protected. No entry
/// for self ever exists here.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<HashMap<u16, Peer>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            inner: Mutex::new(HashMap::with_capacity(32)),
        }
    }

    /// Add a new peer. Returns `false` if `peer_id` is already present.
    pub fn add(&self, peer: Peer) -> bool {
        let mut guard = self.inner.lock().unwrap();
        if guard.contains_key(&peer.peer_id) {
            return false;
        }
        guard.insert(peer.peer_id, peer);
        true
    }

    /// Remove and return a peer, if present.
    pub fn remove(&self, peer_id: u16) -> Option<Peer> {
        self.inner.lock().unwrap().remove(&peer_id)
    }

    /// True if the registry holds an entry for `peer_id`.
    pub fn contains(&self, peer_id: u16) -> bool {
        self.inner.lock().unwrap().contains_key(&peer_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` with exclusive access to the peer entry for `peer_id`, if it
    /// exists. Used by the event poller to mutate a peer's vector list and
    /// by doorbell send to read it, both under the same coarse mutex.
    pub fn with_peer_mut<R>(&self, peer_id: u16, f: impl FnOnce(&mut Peer) -> R) -> Option<R> {
        let mut guard = self.inner.lock().unwrap();
        guard.get_mut(&peer_id).map(f)
    }

    pub fn with_peer<R>(&self, peer_id: u16, f: impl FnOnce(&Peer) -> R) -> Option<R> {
        let guard = self.inner.lock().unwrap();
        guard.get(&peer_id).map(f)
    }

    /// Insert a fresh peer if absent, then run `f` on it. Used by the event
    /// poller's "find or create" new-vector path.
    pub fn get_or_insert_mut<R>(&self, peer_id: u16, f: impl FnOnce(&mut Peer) -> R) -> R {
        let mut guard = self.inner.lock().unwrap();
        let peer = guard.entry(peer_id).or_insert_with(|| Peer::new(peer_id));
        f(peer)
    }

    /// Snapshot the set of live peer ids. Safe to call while other threads
    /// add/remove entries; this is a point-in-time copy, not a live cursor,
    /// so removing an entry while iterating a snapshot is safe — removals
    /// act on the map, not on this snapshot.
    pub fn peer_ids(&self) -> Vec<u16> {
        self.inner.lock().unwrap().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_duplicate() {
        let reg = Registry::new();
        assert!(reg.add(Peer::new(3)));
        assert!(!reg.add(Peer::new(3)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_returns_last_added() {
        let reg = Registry::new();
        reg.add(Peer::new(7));
        let removed = reg.remove(7).unwrap();
        assert_eq!(removed.peer_id, 7);
        assert!(!reg.contains(7));
    }

    #[test]
    fn size_is_monotone_in_adds_minus_removes() {
        let reg = Registry::new();
        reg.add(Peer::new(1));
        reg.add(Peer::new(2));
        assert_eq!(reg.len(), 2);
        reg.remove(1);
        assert_eq!(reg.len(), 1);
        reg.add(Peer::new(3));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn get_or_insert_creates_exactly_once() {
        let reg = Registry::new();
        reg.get_or_insert_mut(9, |p| p.vector_fds.len());
        assert_eq!(reg.len(), 1);
        reg.get_or_insert_mut(9, |_| {});
        assert_eq!(reg.len(), 1);
    }

    proptest::proptest! {
        #[test]
        fn adds_and_removes_preserve_count(ops in proptest::collection::vec(0u16..8, 0..200)) {
            let reg = Registry::new();
            let mut model: std::collections::HashSet<u16> = std::collections::HashSet::new();
            for id in ops {
                if model.contains(&id) {
                    reg.remove(id);
                    model.remove(&id);
                } else {
                    reg.add(Peer::new(id));
                    model.insert(id);
                }
                assert_eq!(reg.len(), model.len());
            }
        }
    }
}
