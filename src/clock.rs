//! Logical clocks for dirent causality
//!
//! Every directory entry carries a [`Clock`] made of three version vectors:
//! when the entry was created, when its content was last modified, and how
//! far its history is known to be synchronized. Each vector maps a
//! [`PeerId`] to the volume epoch that peer had reached.

use crate::db::PeerId;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A volume epoch, the unit of logical time
pub type Epoch = u64;

/// A version vector: peer -> epoch.
///
/// Backed by an ordered map so that the serialized form of equal vectors is
/// byte-identical.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vector {
    entries: BTreeMap<PeerId, Epoch>,
}

impl Vector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a vector holding a single entry
    pub fn with_initial(peer: PeerId, epoch: Epoch) -> Self {
        let mut vector = Self::new();
        vector.set(peer, epoch);
        vector
    }

    /// Epoch known for `peer`; 0 if none
    pub fn get(&self, peer: PeerId) -> Epoch {
        self.entries.get(&peer).copied().unwrap_or(0)
    }

    pub fn set(&mut self, peer: PeerId, epoch: Epoch) {
        self.entries.insert(peer, epoch);
    }

    /// Take the entrywise maximum with `other`
    pub fn merge(&mut self, other: &Vector) {
        for (&peer, &epoch) in &other.entries {
            let entry = self.entries.entry(peer).or_insert(0);
            *entry = (*entry).max(epoch);
        }
    }

    /// Whether every entry of `self` is covered by `other`
    pub fn dominated_by(&self, other: &Vector) -> bool {
        self.entries
            .iter()
            .all(|(&peer, &epoch)| epoch <= other.get(peer))
    }

    /// Check if this vector happened before another (self < other)
    pub fn happened_before(&self, other: &Vector) -> bool {
        self.dominated_by(other) && !other.dominated_by(self)
    }

    /// Compare two vectors and return their relationship
    pub fn compare(&self, other: &Vector) -> ClockOrdering {
        match (self.dominated_by(other), other.dominated_by(self)) {
            (true, true) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (false, false) => ClockOrdering::Concurrent,
        }
    }

    /// Highest epoch recorded for any peer
    pub fn max_epoch(&self) -> Epoch {
        self.entries.values().copied().max().unwrap_or(0)
    }

    /// Iterate entries in peer order
    pub fn iter(&self) -> impl Iterator<Item = (PeerId, Epoch)> + '_ {
        self.entries.iter().map(|(&peer, &epoch)| (peer, epoch))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Ordering relationship between two vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    Equal,
    Before,
    After,
    /// Neither vector covers the other
    Concurrent,
}

/// The persisted clock of one directory entry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Clock {
    synced: Vector,
    modified: Vector,
    created: Vector,
}

impl Clock {
    /// Clock of an entry created by `peer` at `now`
    pub fn create(peer: PeerId, now: Epoch) -> Self {
        Clock {
            synced: Vector::with_initial(peer, now),
            modified: Vector::with_initial(peer, now),
            created: Vector::with_initial(peer, now),
        }
    }

    /// Record a modification by `peer` at `now`.
    ///
    /// The modifying peer has by definition seen its own change, so the
    /// sync vector advances along with the modification vector.
    pub fn update(&mut self, peer: PeerId, now: Epoch) {
        self.modified.set(peer, now);
        self.synced.set(peer, now);
    }

    /// Record that `other`'s history has been merged into this clock
    pub fn merge_synced(&mut self, other: &Clock) {
        self.synced.merge(&other.synced);
    }

    pub fn synced(&self) -> &Vector {
        &self.synced
    }

    pub fn modified(&self) -> &Vector {
        &self.modified
    }

    pub fn created(&self) -> &Vector {
        &self.created
    }

    /// Highest epoch mentioned anywhere in the clock
    pub fn max_epoch(&self) -> Epoch {
        self.synced
            .max_epoch()
            .max(self.modified.max_epoch())
            .max(self.created.max_epoch())
    }

    /// Serialize the clock for storage and transfer
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a clock
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| Error::Deserialization(format!("clock: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const A: PeerId = PeerId(0);
    const B: PeerId = PeerId(1);
    const C: PeerId = PeerId(2);

    #[test]
    fn test_vector_merge() {
        let mut v1 = Vector::new();
        v1.set(A, 3);
        v1.set(B, 1);

        let mut v2 = Vector::new();
        v2.set(A, 2);
        v2.set(B, 4);

        v1.merge(&v2);
        assert_eq!(v1.get(A), 3);
        assert_eq!(v1.get(B), 4);
        assert_eq!(v1.get(C), 0);
    }

    #[test]
    fn test_vector_compare() {
        let v1 = Vector::with_initial(A, 1);
        let v2 = Vector::with_initial(A, 2);
        assert_eq!(v1.compare(&v1), ClockOrdering::Equal);
        assert_eq!(v1.compare(&v2), ClockOrdering::Before);
        assert_eq!(v2.compare(&v1), ClockOrdering::After);
        assert!(v1.happened_before(&v2));

        let mut v3 = Vector::with_initial(A, 2);
        v3.set(B, 1);
        let mut v4 = Vector::with_initial(A, 1);
        v4.set(B, 2);
        assert_eq!(v3.compare(&v4), ClockOrdering::Concurrent);
    }

    #[test]
    fn test_missing_entries_count_as_zero() {
        let mut v1 = Vector::with_initial(A, 3);
        v1.set(B, 0);
        let v2 = Vector::with_initial(A, 3);
        assert_eq!(v1.compare(&v2), ClockOrdering::Equal);

        // Disjoint peers are concurrent
        let v3 = Vector::with_initial(C, 5);
        assert_eq!(v2.compare(&v3), ClockOrdering::Concurrent);
    }

    #[test]
    fn test_clock_create_and_update() {
        let mut clock = Clock::create(A, 4);
        assert_eq!(clock.created().get(A), 4);
        assert_eq!(clock.modified().get(A), 4);
        assert_eq!(clock.synced().get(A), 4);

        clock.update(A, 7);
        assert_eq!(clock.created().get(A), 4);
        assert_eq!(clock.modified().get(A), 7);
        assert_eq!(clock.synced().get(A), 7);
        assert_eq!(clock.max_epoch(), 7);
    }

    #[test]
    fn test_merge_synced_leaves_modified() {
        let mut local = Clock::create(A, 2);
        let remote = Clock::create(B, 9);
        local.merge_synced(&remote);
        assert_eq!(local.synced().get(B), 9);
        assert_eq!(local.modified().get(B), 0);
    }

    #[test]
    fn test_clock_bytes_are_deterministic() {
        let mut c1 = Clock::create(B, 1);
        c1.update(A, 2);
        let mut c2 = Clock::create(B, 1);
        c2.update(A, 2);
        assert_eq!(c1.to_bytes().unwrap(), c2.to_bytes().unwrap());
        assert_eq!(Clock::from_bytes(&c1.to_bytes().unwrap()).unwrap(), c1);
        assert!(Clock::from_bytes(&[0xff]).is_err());
    }

    proptest! {
        #[test]
        fn test_merge_is_upper_bound(
            left in proptest::collection::btree_map(0u32..8, 0u64..1000, 0..8),
            right in proptest::collection::btree_map(0u32..8, 0u64..1000, 0..8),
        ) {
            let mut v1 = Vector::new();
            for (peer, epoch) in &left {
                v1.set(PeerId(*peer), *epoch);
            }
            let mut v2 = Vector::new();
            for (peer, epoch) in &right {
                v2.set(PeerId(*peer), *epoch);
            }
            let mut merged = v1.clone();
            merged.merge(&v2);
            prop_assert!(v1.dominated_by(&merged));
            prop_assert!(v2.dominated_by(&merged));
        }
    }
}
