//! Last-writer-wins register resolved by operation ID.
//!
//! Used for node attributes, root attributes and node types. The write with
//! the greatest [`OpId`] wins regardless of the order in which writes arrive.

use super::id::OpId;
use serde::{Deserialize, Serialize};

/// A Last-Writer-Wins register for a single value.
///
/// # Example
///
/// ```rust
/// use docsync_core::crdt::{LwwRegister, OpId, ReplicaId};
///
/// let early = OpId::new(1, ReplicaId::from("a"), 1);
/// let late = OpId::new(2, ReplicaId::from("b"), 1);
///
/// let mut reg = LwwRegister::new("left", early.clone());
/// assert!(reg.set("center", late));
/// assert!(!reg.set("right", early)); // older write loses
/// assert_eq!(*reg.get(), "center");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwRegister<T> {
    value: T,
    stamp: OpId,
}

impl<T> LwwRegister<T> {
    pub fn new(value: T, stamp: OpId) -> Self {
        Self { value, stamp }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// The operation that wrote the current value.
    pub fn stamp(&self) -> &OpId {
        &self.stamp
    }

    /// Set a new value if `stamp` is newer than the current one.
    ///
    /// Returns `true` if the value was updated.
    pub fn set(&mut self, value: T, stamp: OpId) -> bool {
        if stamp > self.stamp {
            self.value = value;
            self.stamp = stamp;
            true
        } else {
            false
        }
    }
}
