//! Identifiers for replicas, operations and the units they produce.
//!
//! `OpId` is the foundation of every deterministic decision the engine makes:
//! sibling order in the sequence tree, last-writer-wins registers and mark
//! resolution all compare `OpId`s.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Opaque identifier of one editing replica.
///
/// Ordering is lexicographic and is used as the tiebreaker between operations
/// that carry the same Lamport timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(String);

impl ReplicaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random replica identifier (uuid v4).
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReplicaId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ReplicaId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Globally unique identifier of an operation
///
/// `(replica, seq)` alone is unique. The Lamport timestamp is carried so that
/// every replica can derive the same total order without coordination.
///
/// # Ordering
///
/// OpIds are ordered by:
/// 1. Lamport timestamp
/// 2. Replica ID (tiebreaker for concurrent operations)
/// 3. Sequence number
///
/// # Example
///
/// ```rust
/// use docsync_core::crdt::{OpId, ReplicaId};
///
/// let a = OpId::new(1, ReplicaId::from("replica-1"), 1);
/// let b = OpId::new(1, ReplicaId::from("replica-2"), 1);
/// let c = OpId::new(2, ReplicaId::from("replica-1"), 2);
///
/// // Same timestamp: ordered by replica
/// assert!(a < b);
///
/// // Higher timestamp always comes after
/// assert!(c > b);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpId {
    /// Lamport timestamp at creation
    pub lamport: u64,

    /// Replica that created the operation
    pub replica: ReplicaId,

    /// Per-replica sequence number, starting at 1
    pub seq: u64,
}

impl OpId {
    pub fn new(lamport: u64, replica: ReplicaId, seq: u64) -> Self {
        Self {
            lamport,
            replica,
            seq,
        }
    }

    /// Identifier of the `offset`-th unit produced by this operation.
    pub fn unit(&self, offset: u32) -> UnitId {
        UnitId {
            op: self.clone(),
            offset,
        }
    }
}

impl Ord for OpId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lamport
            .cmp(&other.lamport)
            .then_with(|| self.replica.cmp(&other.replica))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for OpId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.replica, self.seq, self.lamport)
    }
}

/// Identifier of one unit of content (a grapheme or a node boundary).
///
/// An insert-text operation produces one unit per grapheme cluster; `offset`
/// is the grapheme index within that run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId {
    pub op: OpId,
    pub offset: u32,
}

impl UnitId {
    pub fn new(op: OpId, offset: u32) -> Self {
        Self { op, offset }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.op, self.offset)
    }
}

/// The container a unit lives in: the document root or a node unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentRef {
    Root,
    Node(UnitId),
}

impl ParentRef {
    pub fn node(&self) -> Option<&UnitId> {
        match self {
            ParentRef::Root => None,
            ParentRef::Node(id) => Some(id),
        }
    }
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentRef::Root => f.write_str("root"),
            ParentRef::Node(id) => write!(f, "{}", id),
        }
    }
}
