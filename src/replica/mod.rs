//! A single replica of a collaborative document.
//!
//! [`Replica`] owns everything one participant holds locally: the operation
//! log, the causality tracker, the merge engine and the undo history. It is
//! a plain single-owner value: local intents and remote deliveries are both
//! `&mut self` calls, and the sync driver serializes them by owning the
//! replica inside one task.
//!
//! # Example
//!
//! ```
//! use docsync_core::{Position, Replica};
//!
//! let mut alice = Replica::new("alice").unwrap();
//! let mut bob = Replica::new("bob").unwrap();
//!
//! alice.insert_text(&Position::root(0), "Hello").unwrap();
//! bob.receive_batch(alice.take_outbox());
//! bob.insert_text(&Position::root(5), " World").unwrap();
//! alice.receive_batch(bob.take_outbox());
//!
//! assert_eq!(alice.text(), "Hello World");
//! assert_eq!(alice.text(), bob.text());
//! ```

mod edit;
mod history;

use crate::config::Config;
use crate::crdt::{
    AttrValue, Engine, MarkType, MarkValue, NodeType, OpKind, Operation, ParentRef, ReplicaId, UnitContent, UnitId,
};
use crate::document::{parse_markup, Anchor, DocumentSnapshot, Fragment, Position, Schema};
use crate::error::{Result, SeedError, SyncError};
use crate::sync::{CausalityTracker, OperationLog, SyncHealth, VectorClock};
use crate::undo::{Change, UndoManager};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, error, warn};
use unicode_segmentation::UnicodeSegmentation;

/// Result of [`Replica::seed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    /// The markup was imported as this many operations
    Seeded { operations: usize },
    /// The markup was rejected and the document starts empty
    Fallback { reason: SeedError },
}

#[derive(Debug, Clone)]
pub struct Replica {
    schema: Schema,
    config: Config,
    tracker: CausalityTracker,
    engine: Engine,
    log: OperationLog,
    outbox: Vec<Operation>,
    history: UndoManager,
}

impl Replica {
    pub fn new(id: impl Into<ReplicaId>) -> Result<Self> {
        Self::with_config(id, Config::default())
    }

    pub fn with_config(id: impl Into<ReplicaId>, config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            schema: Schema::standard()?,
            history: UndoManager::new(&config.undo),
            config,
            tracker: CausalityTracker::new(id.into()),
            engine: Engine::new(),
            log: OperationLog::new(),
            outbox: Vec::new(),
        })
    }

    /// Rebuild a replica from a persisted log.
    ///
    /// Operations the log holds for `id` itself count as already sent; new
    /// local operations continue that replica's sequence.
    pub fn from_log(id: impl Into<ReplicaId>, config: Config, log: &OperationLog) -> Result<Self> {
        let mut replica = Self::with_config(id, config)?;
        replica.receive_batch(log.iter().cloned());
        Ok(replica)
    }

    pub fn id(&self) -> &ReplicaId {
        self.tracker.replica()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    // ── sync ─────────────────────────────────────────────────────────────

    /// The applied-operation frontier, sent to peers on reconnect.
    pub fn version(&self) -> &VectorClock {
        self.tracker.version()
    }

    pub fn sync_health(&self) -> SyncHealth {
        self.tracker.health()
    }

    /// Operations a peer at version `known` has not seen yet.
    pub fn ops_since(&self, known: &VectorClock) -> Vec<Operation> {
        self.log.missing_from(known)
    }

    /// Local operations generated since the last call, oldest first.
    pub fn take_outbox(&mut self) -> Vec<Operation> {
        std::mem::take(&mut self.outbox)
    }

    /// Put operations back at the front of the outbox.
    pub fn requeue(&mut self, mut ops: Vec<Operation>) {
        ops.append(&mut self.outbox);
        self.outbox = ops;
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Deliver one remote operation. Returns how many operations were
    /// applied, which may include previously buffered ones.
    pub fn receive(&mut self, op: Operation) -> usize {
        self.receive_batch(std::iter::once(op))
    }

    pub fn receive_batch(&mut self, ops: impl IntoIterator<Item = Operation>) -> usize {
        let mut applied = 0;
        for op in ops {
            for ready in self.tracker.receive(op) {
                self.engine.apply(&ready);
                self.log.append(ready);
                applied += 1;
            }
        }
        if applied > 0 {
            debug!(replica = %self.id(), applied, "applied remote operations");
        }

        let health = self.tracker.health();
        if health.is_stalled() {
            warn!(
                replica = %self.id(),
                buffered = health.buffered,
                missing = ?health.missing,
                "sync stalled on missing dependencies"
            );
        }
        applied
    }

    // ── reads ────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot::project(&self.engine)
    }

    /// Plain text of the document, one line per text block.
    pub fn text(&self) -> String {
        self.snapshot().text()
    }

    /// Number of visible children of `parent`.
    pub fn children_len(&self, parent: &ParentRef) -> usize {
        self.engine.children(parent).len()
    }

    /// Visible children of `parent`, as unit IDs.
    pub fn child_ids(&self, parent: &ParentRef) -> Vec<UnitId> {
        self.engine
            .children(parent)
            .into_iter()
            .map(|item| item.unit.id.clone())
            .collect()
    }

    pub fn node_type(&self, id: &UnitId) -> Option<NodeType> {
        self.engine.node_type(id)
    }

    /// Current value of an attribute, falling back to the schema default.
    pub fn attribute(&self, target: &ParentRef, key: &str) -> Option<AttrValue> {
        self.engine
            .attribute(target, key)
            .cloned()
            .or_else(|| self.schema.attribute_default(key))
    }

    /// Marks of the character just before `position`: the formatting text
    /// typed there would continue.
    pub fn marks_at(&self, position: &Position) -> Result<BTreeMap<MarkType, MarkValue>> {
        let items = self.engine.children(&position.parent);
        if position.offset > items.len() {
            return Err(SyncError::PositionOutOfBounds {
                offset: position.offset,
                len: items.len(),
            });
        }
        Ok(position
            .offset
            .checked_sub(1)
            .map(|i| items[i].unit)
            .filter(|unit| unit.as_char().is_some())
            .map(|unit| self.engine.marks_of(&unit.id))
            .unwrap_or_default())
    }

    /// Capture a position as an anchor that survives concurrent edits.
    pub fn anchor_at(&self, position: &Position) -> Result<Anchor> {
        let items = self.engine.children(&position.parent);
        if position.offset > items.len() {
            return Err(SyncError::PositionOutOfBounds {
                offset: position.offset,
                len: items.len(),
            });
        }
        Ok(Anchor {
            parent: position.parent.clone(),
            after: position.offset.checked_sub(1).map(|i| items[i].unit.id.clone()),
        })
    }

    /// Current position of an anchor.
    ///
    /// When the unit the anchor follows has been deleted, the position falls
    /// back to just after the nearest visible unit before it. Returns `None`
    /// when the anchor's container no longer exists.
    pub fn resolve_anchor(&self, anchor: &Anchor) -> Option<Position> {
        if !self.engine.is_live_container(&anchor.parent) {
            return None;
        }
        let items = self.engine.children(&anchor.parent);
        let index: HashMap<&UnitId, usize> = items
            .iter()
            .enumerate()
            .map(|(i, item)| (&item.unit.id, i))
            .collect();

        let mut cursor = anchor.after.clone();
        while let Some(id) = cursor {
            if let Some(i) = index.get(&id) {
                return Some(Position::new(anchor.parent.clone(), i + 1));
            }
            let unit = self.engine.unit(&id)?;
            let prev = self
                .engine
                .sequence(&unit.parent)
                .and_then(|seq| seq.prev_before(&id))
                .cloned();
            cursor = prev.or_else(|| match &unit.parent {
                ParentRef::Node(node) if Some(node) != anchor.parent.node() => {
                    self.engine.unit(node).filter(|n| n.is_deleted()).map(|n| n.id.clone())
                }
                _ => None,
            });
        }
        Some(Position::new(anchor.parent.clone(), 0))
    }

    // ── seeding ──────────────────────────────────────────────────────────

    /// Import initial content. Only an empty log can be seeded.
    ///
    /// Malformed markup is not an error for the caller: the document starts
    /// empty and the rejected blob is logged verbatim for recovery.
    pub fn seed(&mut self, markup: &str) -> Result<SeedOutcome> {
        if !self.log.is_empty() {
            return Err(SyncError::AlreadySeeded);
        }
        match parse_markup(&self.schema, markup) {
            Ok(fragments) => {
                self.insert_fragments(&ParentRef::Root, None, &fragments);
                Ok(SeedOutcome::Seeded {
                    operations: self.log.len(),
                })
            }
            Err(reason) => {
                error!(%reason, blob = markup, "seed content rejected, starting from an empty document");
                Ok(SeedOutcome::Fallback { reason })
            }
        }
    }

    // ── internals shared by intents and history ──────────────────────────

    /// Stamp, apply and queue one local operation.
    fn commit(&mut self, kind: OpKind) -> Operation {
        let op = self.tracker.stamp(kind);
        self.engine.apply(&op);
        self.log.append(op.clone());
        self.outbox.push(op.clone());
        op
    }

    fn record(&mut self, changes: Vec<Change>) {
        self.history.record(changes, Instant::now());
    }

    /// Insert fragments after `left` in `parent`, in order. Returns every
    /// unit created, nested ones included.
    fn insert_fragments(
        &mut self,
        parent: &ParentRef,
        mut left: Option<UnitId>,
        fragments: &[Fragment],
    ) -> Vec<UnitId> {
        let mut created = Vec::new();
        for fragment in fragments {
            let right = self.next_after(parent, left.as_ref());
            match fragment {
                Fragment::Text { text, marks } => {
                    if text.is_empty() {
                        continue;
                    }
                    let op = self.commit(OpKind::InsertText {
                        parent: parent.clone(),
                        left: left.clone(),
                        right,
                        text: text.clone(),
                    });
                    let count = text.graphemes(true).count() as u32;
                    let units: Vec<UnitId> = (0..count).map(|i| op.id.unit(i)).collect();
                    if let (Some(first), Some(last)) = (units.first(), units.last()) {
                        for (mark, value) in marks {
                            self.commit(OpKind::SetMark {
                                parent: parent.clone(),
                                start: first.clone(),
                                end: last.clone(),
                                mark: *mark,
                                value: value.clone(),
                            });
                        }
                    }
                    left = units.last().cloned().or(left);
                    created.extend(units);
                }
                Fragment::Node {
                    node_type,
                    attrs,
                    children,
                } => {
                    let op = self.commit(OpKind::InsertNode {
                        parent: parent.clone(),
                        left: left.clone(),
                        right,
                        node_type: *node_type,
                        attrs: attrs.clone(),
                    });
                    let node = op.id.unit(0);
                    created.push(node.clone());
                    let inner = self.insert_fragments(&ParentRef::Node(node.clone()), None, children);
                    created.extend(inner);
                    left = Some(node);
                }
            }
        }
        created
    }

    fn next_after(&self, parent: &ParentRef, left: Option<&UnitId>) -> Option<UnitId> {
        self.engine
            .sequence(parent)
            .and_then(|seq| seq.next_after(left))
            .cloned()
    }

    /// Copy of a unit and its visible content, marks included.
    fn fragment_of(&self, id: &UnitId) -> Option<Fragment> {
        self.capture(id, &|_: &UnitId| true, &mut Vec::new()).map(merged)
    }

    /// Copy of a unit and the visible content beneath it that `keep`
    /// accepts, one text fragment per grapheme. Pushes the unit behind
    /// every fragment onto `sources`, in pre-order.
    fn capture(&self, id: &UnitId, keep: &dyn Fn(&UnitId) -> bool, sources: &mut Vec<UnitId>) -> Option<Fragment> {
        let unit = self.engine.unit(id)?;
        sources.push(id.clone());
        Some(match &unit.content {
            UnitContent::Char(text) => Fragment::Text {
                text: text.clone(),
                marks: self.engine.marks_of(id),
            },
            UnitContent::Node(state) => {
                let mut children = Vec::new();
                for item in self.engine.children(&ParentRef::Node(id.clone())) {
                    if keep(&item.unit.id) {
                        children.extend(self.capture(&item.unit.id, keep, sources));
                    }
                }
                Fragment::Node {
                    node_type: *state.node_type.get(),
                    attrs: state.live_attrs(),
                    children,
                }
            }
        })
    }
}

/// `fragment` with adjacent text joined at every level.
fn merged(fragment: Fragment) -> Fragment {
    match fragment {
        Fragment::Node {
            node_type,
            attrs,
            children,
        } => Fragment::Node {
            node_type,
            attrs,
            children: merge_text(children.into_iter().map(merged).collect()),
        },
        text => text,
    }
}

/// Join adjacent text fragments with equal marks.
fn merge_text(fragments: Vec<Fragment>) -> Vec<Fragment> {
    let mut out: Vec<Fragment> = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        if let (
            Some(Fragment::Text { text, marks }),
            Fragment::Text {
                text: next,
                marks: next_marks,
            },
        ) = (out.last_mut(), &fragment)
        {
            if marks == next_marks {
                text.push_str(next);
                continue;
            }
        }
        out.push(fragment);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_edit_is_queued_and_logged() {
        let mut replica = Replica::new("a").unwrap();
        replica.insert_text(&Position::root(0), "hi").unwrap();
        assert_eq!(replica.outbox_len(), 1);
        assert_eq!(replica.log().len(), 1);
        assert_eq!(replica.version().get(&ReplicaId::from("a")), 1);
        let ops = replica.take_outbox();
        assert_eq!(ops.len(), 1);
        assert_eq!(replica.outbox_len(), 0);

        replica.requeue(ops);
        assert_eq!(replica.outbox_len(), 1);
    }

    #[test]
    fn test_seed_once() {
        let mut replica = Replica::new("a").unwrap();
        let outcome = replica.seed("<h1>Title</h1><p>Body</p>").unwrap();
        assert!(matches!(outcome, SeedOutcome::Seeded { operations } if operations > 0));
        assert_eq!(replica.text(), "Title\nBody");
        assert!(!replica.history.can_undo());
        assert!(matches!(replica.seed("<p>again</p>"), Err(SyncError::AlreadySeeded)));
    }

    #[test]
    fn test_malformed_seed_falls_back_to_empty() {
        let mut replica = Replica::new("a").unwrap();
        let outcome = replica.seed("<p>broken").unwrap();
        assert!(matches!(outcome, SeedOutcome::Fallback { .. }));
        assert!(replica.snapshot().is_empty());
        assert!(replica.log().is_empty());
    }

    #[test]
    fn test_seed_preserves_marks() {
        let mut replica = Replica::new("a").unwrap();
        replica.seed("<p>a<strong>b</strong></p>").unwrap();
        let paragraph = ParentRef::Node(replica.child_ids(&ParentRef::Root)[0].clone());
        let marks = replica.marks_at(&Position::new(paragraph, 2)).unwrap();
        assert_eq!(marks.get(&MarkType::Bold), Some(&MarkValue::On));
    }

    #[test]
    fn test_from_log_resumes_sequence() {
        let mut replica = Replica::new("a").unwrap();
        replica.insert_text(&Position::root(0), "ab").unwrap();
        let log = replica.log().clone();

        let mut restored = Replica::from_log("a", Config::default(), &log).unwrap();
        assert_eq!(restored.text(), "ab");
        assert_eq!(restored.outbox_len(), 0);
        restored.insert_text(&Position::root(2), "c").unwrap();
        let ops = restored.take_outbox();
        assert_eq!(ops[0].id.seq, 2);
    }

    #[test]
    fn test_anchor_survives_edits() {
        let mut replica = Replica::new("a").unwrap();
        replica.insert_text(&Position::root(0), "abcd").unwrap();
        let anchor = replica.anchor_at(&Position::root(2)).unwrap();

        replica.insert_text(&Position::root(0), "xx").unwrap();
        assert_eq!(replica.resolve_anchor(&anchor), Some(Position::root(4)));

        // Deleting the anchoring character falls back to its predecessor
        replica
            .delete_range(&crate::document::TextRange::new(ParentRef::Root, 3, 4))
            .unwrap();
        assert_eq!(replica.text(), "xxacd");
        assert_eq!(replica.resolve_anchor(&anchor), Some(Position::root(3)));
    }

    #[test]
    fn test_attribute_falls_back_to_default() {
        let replica = Replica::new("a").unwrap();
        assert_eq!(
            replica.attribute(&ParentRef::Root, "leftMargin"),
            Some(AttrValue::Int(56))
        );
    }
}
