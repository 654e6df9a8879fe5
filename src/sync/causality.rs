//! Causality tracker: stamps local operations and releases remote ones in
//! causal order.
//!
//! A remote operation is released only once every dependency has been
//! applied. Until then it is buffered under the first dependency it is
//! missing; releasing an operation rechecks whatever waited on it, so a
//! single delivery can cascade through a whole chain.

use crate::crdt::{LamportClock, OpId, OpKind, Operation, ReplicaId};
use crate::sync::VectorClock;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// `(replica, seq)`: the identity of an operation without its timestamp.
pub type Dot = (ReplicaId, u64);

/// Snapshot of buffered work, reported to the sync transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncHealth {
    /// Operations received but not yet applicable
    pub buffered: usize,
    /// Dependencies the buffered operations are waiting on
    pub missing: BTreeSet<Dot>,
}

impl SyncHealth {
    /// A dependency is outstanding; sync is stalled until it arrives.
    pub fn is_stalled(&self) -> bool {
        self.buffered > 0
    }
}

#[derive(Debug, Clone)]
pub struct CausalityTracker {
    replica: ReplicaId,
    applied: VectorClock,
    lamport: LamportClock,
    last_local: Option<OpId>,
    pending: HashMap<Dot, Vec<Operation>>,
    buffered: HashSet<OpId>,
}

impl CausalityTracker {
    pub fn new(replica: ReplicaId) -> Self {
        Self {
            replica,
            applied: VectorClock::new(),
            lamport: LamportClock::new(),
            last_local: None,
            pending: HashMap::new(),
            buffered: HashSet::new(),
        }
    }

    pub fn replica(&self) -> &ReplicaId {
        &self.replica
    }

    /// The applied-operation frontier.
    pub fn version(&self) -> &VectorClock {
        &self.applied
    }

    pub fn lamport(&self) -> u64 {
        self.lamport.value()
    }

    /// Stamp a locally generated operation with the next sequence number,
    /// a fresh Lamport timestamp and its dependency set.
    ///
    /// Dependencies are the previous local operation plus every operation
    /// whose units `kind` refers to. The operation counts as applied from
    /// here on.
    pub fn stamp(&mut self, kind: OpKind) -> Operation {
        let seq = self.applied.get(&self.replica) + 1;
        let id = OpId::new(self.lamport.tick(), self.replica.clone(), seq);

        let mut deps: Vec<OpId> = self.last_local.iter().cloned().collect();
        deps.extend(kind.references().into_iter().map(|unit| unit.op.clone()));
        deps.sort();
        deps.dedup();

        self.applied.observe(&self.replica, seq);
        self.last_local = Some(id.clone());
        Operation { id, deps, kind }
    }

    /// Feed a remote operation. Returns the operations that became
    /// applicable, in an order consistent with their dependencies.
    ///
    /// Already applied or already buffered operations are ignored.
    pub fn receive(&mut self, op: Operation) -> Vec<Operation> {
        if self.applied.contains(&op.id) || self.buffered.contains(&op.id) {
            return Vec::new();
        }

        let mut ready = Vec::new();
        let mut queue = VecDeque::from([op]);
        while let Some(op) = queue.pop_front() {
            if self.applied.contains(&op.id) {
                continue;
            }
            if let Some(dep) = self.first_missing(&op) {
                debug!(op = %op.id, missing = ?dep, "buffering operation");
                self.buffered.insert(op.id.clone());
                self.pending.entry(dep).or_default().push(op);
                continue;
            }

            self.buffered.remove(&op.id);
            self.applied.observe(&op.id.replica, op.id.seq);
            self.lamport.update(op.id.lamport);
            if op.id.replica == self.replica
                && self.last_local.as_ref().map_or(true, |last| last.seq < op.id.seq)
            {
                self.last_local = Some(op.id.clone());
            }
            if let Some(waiting) = self.pending.remove(&(op.id.replica.clone(), op.id.seq)) {
                queue.extend(waiting);
            }
            ready.push(op);
        }
        ready
    }

    fn first_missing(&self, op: &Operation) -> Option<Dot> {
        let prev = self.applied.get(&op.id.replica);
        if op.id.seq > prev + 1 {
            return Some((op.id.replica.clone(), prev + 1));
        }
        op.deps
            .iter()
            .find(|dep| !self.applied.contains(dep))
            .map(|dep| (dep.replica.clone(), dep.seq))
    }

    pub fn health(&self) -> SyncHealth {
        SyncHealth {
            buffered: self.buffered.len(),
            missing: self.pending.keys().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::ParentRef;

    fn text(s: &str) -> OpKind {
        OpKind::InsertText {
            parent: ParentRef::Root,
            left: None,
            right: None,
            text: s.into(),
        }
    }

    #[test]
    fn test_stamp_assigns_contiguous_seq_and_prev_dep() {
        let mut tracker = CausalityTracker::new(ReplicaId::from("a"));
        let first = tracker.stamp(text("x"));
        let second = tracker.stamp(text("y"));

        assert_eq!(first.id.seq, 1);
        assert_eq!(second.id.seq, 2);
        assert!(second.id.lamport > first.id.lamport);
        assert_eq!(second.deps, vec![first.id.clone()]);
        assert_eq!(tracker.version().get(&ReplicaId::from("a")), 2);
    }

    #[test]
    fn test_stamp_depends_on_referenced_units() {
        let mut remote = CausalityTracker::new(ReplicaId::from("b"));
        let base = remote.stamp(text("ab"));

        let mut tracker = CausalityTracker::new(ReplicaId::from("a"));
        tracker.receive(base.clone());
        let op = tracker.stamp(OpKind::Delete {
            targets: vec![base.id.unit(0), base.id.unit(1)],
        });
        assert_eq!(op.deps, vec![base.id.clone()]);
        assert!(op.id.lamport > base.id.lamport);
    }

    #[test]
    fn test_out_of_order_chain_cascades() {
        let mut source = CausalityTracker::new(ReplicaId::from("b"));
        let a = source.stamp(text("a"));
        let b = source.stamp(text("b"));
        let c = source.stamp(text("c"));

        let mut tracker = CausalityTracker::new(ReplicaId::from("x"));
        assert!(tracker.receive(c.clone()).is_empty());
        assert!(tracker.receive(b.clone()).is_empty());
        assert!(tracker.health().is_stalled());

        let released: Vec<_> = tracker.receive(a.clone()).into_iter().map(|o| o.id).collect();
        assert_eq!(released, vec![a.id, b.id, c.id]);
        assert!(!tracker.health().is_stalled());
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let mut source = CausalityTracker::new(ReplicaId::from("b"));
        let a = source.stamp(text("a"));
        let b = source.stamp(text("b"));

        let mut tracker = CausalityTracker::new(ReplicaId::from("x"));
        tracker.receive(b.clone());
        assert!(tracker.receive(b.clone()).is_empty());
        assert_eq!(tracker.health().buffered, 1);

        assert_eq!(tracker.receive(a.clone()).len(), 2);
        assert!(tracker.receive(a).is_empty());
        assert!(tracker.receive(b).is_empty());
    }

    #[test]
    fn test_health_reports_missing_dependency() {
        let mut source = CausalityTracker::new(ReplicaId::from("b"));
        let _lost = source.stamp(text("a"));
        let next = source.stamp(text("b"));

        let mut tracker = CausalityTracker::new(ReplicaId::from("x"));
        tracker.receive(next);
        let health = tracker.health();
        assert_eq!(health.buffered, 1);
        assert!(health.missing.contains(&(ReplicaId::from("b"), 1)));
    }
}
