//! Per-replica undo/redo stacks.
//!
//! Only local intents are recorded. Each intent contributes one [`Change`]
//! per kind of effect it had, and the changes of one intent (or of several
//! rapid intents, with a capture window) form a group. Reverting a group
//! appends new operations; the changes describing what the revert did form
//! the group pushed onto the opposite stack, so undo and redo are the same
//! mechanism run in both directions.

use crate::config::UndoConfig;
use crate::crdt::{AttrValue, MarkType, MarkValue, NodeType, OpId, ParentRef, UnitId};
use crate::document::Fragment;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Content removed by a local delete, restorable in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreItem {
    /// Container the content was visible in when deleted
    pub parent: ParentRef,
    /// Unit of `parent`'s sequence the content is restored after
    pub after: UnitId,
    /// Copy of the deleted content, one text fragment per grapheme
    pub fragment: Fragment,
    /// The unit behind each fragment of `fragment`, in pre-order
    pub sources: Vec<UnitId>,
}

/// One reversible effect of a local intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Units created locally; reverting deletes whichever are still live.
    Inserted { units: Vec<UnitId> },
    /// Content deleted locally; reverting inserts a copy at the old place.
    Deleted { items: Vec<RestoreItem> },
    AttributeSet {
        target: ParentRef,
        key: String,
        previous: Option<AttrValue>,
        applied: OpId,
    },
    Retyped {
        target: UnitId,
        previous: NodeType,
        applied: OpId,
    },
    /// A mark write over `units`, with each unit's value before it.
    MarkSet {
        mark: MarkType,
        previous: Vec<(UnitId, MarkValue)>,
        applied: OpId,
    },
}

pub type Group = Vec<Change>;

#[derive(Debug, Clone)]
pub struct UndoManager {
    undo: VecDeque<Group>,
    redo: Vec<Group>,
    capture_timeout: Duration,
    max_depth: usize,
    last_capture: Option<Instant>,
}

impl UndoManager {
    pub fn new(config: &UndoConfig) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            capture_timeout: config.capture_timeout(),
            max_depth: config.max_depth.max(1),
            last_capture: None,
        }
    }

    /// Record the changes of a new local intent. Clears the redo stack.
    pub fn record(&mut self, changes: Vec<Change>, now: Instant) {
        if changes.is_empty() {
            return;
        }
        self.redo.clear();

        let merge = !self.capture_timeout.is_zero()
            && self
                .last_capture
                .is_some_and(|last| now.saturating_duration_since(last) < self.capture_timeout);
        match self.undo.back_mut() {
            Some(top) if merge => top.extend(changes),
            _ => self.push_bounded(changes),
        }
        self.last_capture = Some(now);
    }

    pub fn take_undo(&mut self) -> Option<Group> {
        self.last_capture = None;
        self.undo.pop_back()
    }

    pub fn take_redo(&mut self) -> Option<Group> {
        self.last_capture = None;
        self.redo.pop()
    }

    /// Push the inverse produced by a redo. Leaves the redo stack intact.
    pub fn push_undo(&mut self, group: Group) {
        if !group.is_empty() {
            self.push_bounded(group);
        }
    }

    pub fn push_redo(&mut self, group: Group) {
        if !group.is_empty() {
            self.redo.push(group);
        }
    }

    fn push_bounded(&mut self, group: Group) {
        self.undo.push_back(group);
        while self.undo.len() > self.max_depth {
            self.undo.pop_front();
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.last_capture = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::ReplicaId;

    fn inserted(seq: u64) -> Change {
        Change::Inserted {
            units: vec![OpId::new(seq, ReplicaId::from("a"), seq).unit(0)],
        }
    }

    #[test]
    fn test_each_intent_is_a_group_by_default() {
        let mut undo = UndoManager::new(&UndoConfig::default());
        let now = Instant::now();
        undo.record(vec![inserted(1)], now);
        undo.record(vec![inserted(2)], now);
        assert_eq!(undo.undo_depth(), 2);
    }

    #[test]
    fn test_capture_window_merges() {
        let config = UndoConfig {
            capture_timeout_ms: 500,
            max_depth: 100,
        };
        let mut undo = UndoManager::new(&config);
        let now = Instant::now();
        undo.record(vec![inserted(1)], now);
        undo.record(vec![inserted(2)], now + Duration::from_millis(100));
        undo.record(vec![inserted(3)], now + Duration::from_secs(2));
        assert_eq!(undo.undo_depth(), 2);
        assert_eq!(undo.take_undo().map(|g| g.len()), Some(1));
        assert_eq!(undo.take_undo().map(|g| g.len()), Some(2));
    }

    #[test]
    fn test_new_intent_clears_redo() {
        let mut undo = UndoManager::new(&UndoConfig::default());
        let now = Instant::now();
        undo.record(vec![inserted(1)], now);
        let group = undo.take_undo().unwrap();
        undo.push_redo(group);
        assert!(undo.can_redo());
        undo.record(vec![inserted(2)], now);
        assert!(!undo.can_redo());
    }

    #[test]
    fn test_depth_is_bounded() {
        let config = UndoConfig {
            capture_timeout_ms: 0,
            max_depth: 3,
        };
        let mut undo = UndoManager::new(&config);
        let now = Instant::now();
        for seq in 1..=5 {
            undo.record(vec![inserted(seq)], now);
        }
        assert_eq!(undo.undo_depth(), 3);
        assert_eq!(undo.take_undo(), Some(vec![inserted(5)]));
    }
}
