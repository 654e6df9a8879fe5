//! Append-only operation log.
//!
//! Operations are stored in the order they were applied, which is always a
//! causal order. History is never rewritten: deletions are new tombstone
//! operations, undo appends inverses.

use crate::crdt::{OpId, Operation};
use crate::sync::VectorClock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    ops: Vec<Operation>,
    index: HashMap<OpId, usize>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation. Returns `false` if it is already logged.
    pub fn append(&mut self, op: Operation) -> bool {
        if self.index.contains_key(&op.id) {
            return false;
        }
        self.index.insert(op.id.clone(), self.ops.len());
        self.ops.push(op);
        true
    }

    pub fn contains(&self, id: &OpId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &OpId) -> Option<&Operation> {
        self.index.get(id).map(|&i| &self.ops[i])
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.ops.iter()
    }

    /// Operations not covered by `known`, in causal order.
    ///
    /// This is the backlog a peer at version `known` needs to catch up.
    pub fn missing_from(&self, known: &VectorClock) -> Vec<Operation> {
        self.ops
            .iter()
            .filter(|op| !known.contains(&op.id))
            .cloned()
            .collect()
    }
}

impl Serialize for OperationLog {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.ops.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OperationLog {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ops = Vec::<Operation>::deserialize(deserializer)?;
        let mut log = OperationLog::new();
        for op in ops {
            log.append(op);
        }
        Ok(log)
    }
}
