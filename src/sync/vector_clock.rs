//! Vector clock summarising which operations a replica has applied.
//!
//! Every local operation depends on its replica's previous one, so the set of
//! applied operations from any replica is always a contiguous prefix
//! `1..=n`. A single counter per replica therefore describes the applied set
//! exactly, and backlog replay can be computed from it.

use crate::crdt::{OpId, ReplicaId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Highest contiguous applied sequence number per replica.
///
/// # Example
///
/// ```rust
/// use docsync_core::VectorClock;
/// use docsync_core::crdt::{OpId, ReplicaId};
///
/// let mut clock = VectorClock::new();
/// clock.observe(&ReplicaId::from("a"), 3);
///
/// assert!(clock.contains(&OpId::new(7, ReplicaId::from("a"), 2)));
/// assert!(!clock.contains(&OpId::new(9, ReplicaId::from("a"), 4)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: BTreeMap<ReplicaId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, replica: &ReplicaId) -> u64 {
        self.entries.get(replica).copied().unwrap_or(0)
    }

    /// Raise the counter for `replica` to at least `seq`.
    pub fn observe(&mut self, replica: &ReplicaId, seq: u64) {
        let entry = self.entries.entry(replica.clone()).or_insert(0);
        *entry = (*entry).max(seq);
    }

    pub fn contains(&self, id: &OpId) -> bool {
        self.get(&id.replica) >= id.seq
    }

    /// Pointwise maximum.
    pub fn merge(&mut self, other: &VectorClock) {
        for (replica, seq) in &other.entries {
            self.observe(replica, *seq);
        }
    }

    /// True if every counter in `other` is covered by `self`.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        other
            .entries
            .iter()
            .all(|(replica, seq)| self.get(replica) >= *seq)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaId, &u64)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|seq| *seq == 0)
    }

    /// Total number of operations summarised.
    pub fn total(&self) -> u64 {
        self.entries.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(id: &str) -> ReplicaId {
        ReplicaId::from(id)
    }

    #[test]
    fn test_observe_is_monotonic() {
        let mut clock = VectorClock::new();
        clock.observe(&r("a"), 5);
        clock.observe(&r("a"), 2);
        assert_eq!(clock.get(&r("a")), 5);
        assert_eq!(clock.get(&r("b")), 0);
    }

    #[test]
    fn test_merge_and_dominates() {
        let mut a = VectorClock::new();
        a.observe(&r("a"), 3);
        let mut b = VectorClock::new();
        b.observe(&r("b"), 2);

        assert!(!a.dominates(&b));
        a.merge(&b);
        assert!(a.dominates(&b));
        assert_eq!(a.total(), 5);
    }

    #[test]
    fn test_serializes_as_map() {
        let mut clock = VectorClock::new();
        clock.observe(&r("replica-1"), 4);
        let json = serde_json::to_string(&clock).unwrap();
        assert_eq!(json, r#"{"replica-1":4}"#);
        let back: VectorClock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, clock);
    }

    #[test]
    fn test_empty() {
        assert!(VectorClock::new().is_empty());
    }
}
