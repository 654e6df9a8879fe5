//! Merge/resolution engine.
//!
//! Folds causally delivered operations into the replicated state: one Fugue
//! [`Sequence`] and one [`MarkLayer`] per container, a [`Unit`] per inserted
//! grapheme or node, and LWW registers for attributes and node types.
//!
//! The fold is deterministic and order-independent for concurrent
//! operations, and idempotent: applying an already applied [`OpId`] does
//! nothing. Well-formed input never produces an error. References to unknown
//! units, which causal delivery rules out, are logged and skipped.

use super::id::{OpId, ParentRef, UnitId};
use super::marks::{MarkLayer, MarkSpan};
use super::op::{OpKind, Operation};
use super::register::LwwRegister;
use super::sequence::Sequence;
use super::unit::{AttrValue, MarkType, MarkValue, NodeState, NodeType, Unit, UnitContent};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

/// A visible child of a container.
///
/// `slot` is the unit of the container's own sequence the item belongs to.
/// For ordinary children it is the unit itself. For content lifted out of a
/// deleted node it is that deleted node.
#[derive(Debug, Clone, Copy)]
pub struct Item<'a> {
    pub unit: &'a Unit,
    pub slot: &'a UnitId,
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    units: HashMap<UnitId, Unit>,
    sequences: HashMap<ParentRef, Sequence>,
    marks: HashMap<ParentRef, MarkLayer>,
    root_attrs: BTreeMap<String, LwwRegister<Option<AttrValue>>>,
    applied: HashSet<OpId>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_applied(&self, id: &OpId) -> bool {
        self.applied.contains(id)
    }

    /// Number of units ever inserted, tombstones included.
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Apply one operation. Returns `false` for an already applied ID.
    pub fn apply(&mut self, op: &Operation) -> bool {
        if !self.applied.insert(op.id.clone()) {
            return false;
        }

        match &op.kind {
            OpKind::InsertText {
                parent,
                left,
                right,
                text,
            } => {
                if !self.container_exists(parent) {
                    warn!(op = %op.id, %parent, "insert into unknown container skipped");
                    return true;
                }
                let seq = self.sequences.entry(parent.clone()).or_default();
                let mut prev = left.clone();
                for (offset, grapheme) in text.graphemes(true).enumerate() {
                    let id = op.id.unit(offset as u32);
                    seq.insert(id.clone(), prev.as_ref(), right.as_ref());
                    self.units.insert(
                        id.clone(),
                        Unit {
                            id: id.clone(),
                            parent: parent.clone(),
                            content: UnitContent::Char(grapheme.to_string()),
                            deleted_by: BTreeSet::new(),
                        },
                    );
                    prev = Some(id);
                }
            }
            OpKind::InsertNode {
                parent,
                left,
                right,
                node_type,
                attrs,
            } => {
                if !self.container_exists(parent) {
                    warn!(op = %op.id, %parent, "insert into unknown container skipped");
                    return true;
                }
                let id = op.id.unit(0);
                self.sequences
                    .entry(parent.clone())
                    .or_default()
                    .insert(id.clone(), left.as_ref(), right.as_ref());
                self.units.insert(
                    id.clone(),
                    Unit {
                        id,
                        parent: parent.clone(),
                        content: UnitContent::Node(NodeState::new(*node_type, attrs.clone(), &op.id)),
                        deleted_by: BTreeSet::new(),
                    },
                );
            }
            OpKind::Delete { targets } => {
                for target in targets {
                    match self.units.get_mut(target) {
                        Some(unit) => {
                            unit.deleted_by.insert(op.id.clone());
                        }
                        None => warn!(op = %op.id, %target, "delete of unknown unit skipped"),
                    }
                }
            }
            OpKind::SetAttribute { target, key, value } => match target {
                ParentRef::Root => {
                    write_register(&mut self.root_attrs, key, value.clone(), &op.id);
                }
                ParentRef::Node(id) => match self.units.get_mut(id).map(|u| &mut u.content) {
                    Some(UnitContent::Node(state)) => {
                        write_register(&mut state.attrs, key, value.clone(), &op.id);
                    }
                    _ => warn!(op = %op.id, target = %id, "attribute on unknown node skipped"),
                },
            },
            OpKind::SetNodeType { target, node_type } => {
                match self.units.get_mut(target).map(|u| &mut u.content) {
                    Some(UnitContent::Node(state)) => {
                        state.node_type.set(*node_type, op.id.clone());
                    }
                    _ => warn!(op = %op.id, %target, "retype of unknown node skipped"),
                }
            }
            OpKind::SetMark {
                parent,
                start,
                end,
                mark,
                value,
            } => {
                self.marks.entry(parent.clone()).or_default().add(MarkSpan {
                    op: op.id.clone(),
                    start: start.clone(),
                    end: end.clone(),
                    mark: *mark,
                    value: value.clone(),
                });
            }
        }
        true
    }

    fn container_exists(&self, parent: &ParentRef) -> bool {
        match parent {
            ParentRef::Root => true,
            ParentRef::Node(id) => self.units.get(id).is_some_and(|u| u.as_node().is_some()),
        }
    }

    pub fn unit(&self, id: &UnitId) -> Option<&Unit> {
        self.units.get(id)
    }

    pub fn sequence(&self, parent: &ParentRef) -> Option<&Sequence> {
        self.sequences.get(parent)
    }

    pub fn node(&self, id: &UnitId) -> Option<&NodeState> {
        self.units.get(id).and_then(Unit::as_node)
    }

    /// A container that can currently receive local edits.
    pub fn is_live_container(&self, parent: &ParentRef) -> bool {
        match parent {
            ParentRef::Root => true,
            ParentRef::Node(id) => self
                .units
                .get(id)
                .is_some_and(|u| !u.is_deleted() && u.as_node().is_some()),
        }
    }

    pub fn node_type(&self, id: &UnitId) -> Option<NodeType> {
        self.node(id).map(|n| *n.node_type.get())
    }

    pub fn node_type_stamp(&self, id: &UnitId) -> Option<&OpId> {
        self.node(id).map(|n| n.node_type.stamp())
    }

    pub fn attribute(&self, target: &ParentRef, key: &str) -> Option<&AttrValue> {
        self.attr_register(target, key).and_then(|r| r.get().as_ref())
    }

    /// The operation that last wrote `key` on `target`.
    pub fn attribute_stamp(&self, target: &ParentRef, key: &str) -> Option<&OpId> {
        self.attr_register(target, key).map(|r| r.stamp())
    }

    fn attr_register(&self, target: &ParentRef, key: &str) -> Option<&LwwRegister<Option<AttrValue>>> {
        match target {
            ParentRef::Root => self.root_attrs.get(key),
            ParentRef::Node(id) => self.node(id).and_then(|n| n.attrs.get(key)),
        }
    }

    pub fn root_attrs(&self) -> BTreeMap<String, AttrValue> {
        self.root_attrs
            .iter()
            .filter_map(|(k, reg)| reg.get().as_ref().map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Visible children of `parent`, in document order.
    ///
    /// Tombstoned characters are skipped. A tombstoned node contributes its
    /// own visible children in its place, so content inserted concurrently
    /// with the deletion stays in the document, attached to the nearest
    /// surviving ancestor.
    pub fn children(&self, parent: &ParentRef) -> Vec<Item<'_>> {
        let mut out = Vec::new();
        self.collect_children(parent, None, &mut out);
        out
    }

    fn collect_children<'a>(&'a self, parent: &ParentRef, slot: Option<&'a UnitId>, out: &mut Vec<Item<'a>>) {
        let Some(seq) = self.sequences.get(parent) else {
            return;
        };
        for id in seq.ids() {
            let Some(unit) = self.units.get(id) else {
                continue;
            };
            let slot = slot.unwrap_or(&unit.id);
            if !unit.is_deleted() {
                out.push(Item { unit, slot });
            } else if unit.as_node().is_some() {
                self.collect_children(&ParentRef::Node(unit.id.clone()), Some(slot), out);
            }
        }
    }

    /// The node and every unit visible beneath it.
    pub fn subtree(&self, id: &UnitId) -> Vec<UnitId> {
        let mut out = vec![id.clone()];
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            for item in self.children(&ParentRef::Node(current)) {
                out.push(item.unit.id.clone());
                if item.unit.as_node().is_some() {
                    stack.push(item.unit.id.clone());
                }
            }
        }
        out
    }

    /// Units of `parent`'s own sequence between `start` and `end` inclusive,
    /// tombstones included.
    pub fn range_units(&self, parent: &ParentRef, start: &UnitId, end: &UnitId) -> Vec<&UnitId> {
        let Some(seq) = self.sequences.get(parent) else {
            return Vec::new();
        };
        match (seq.index_of(start), seq.index_of(end)) {
            (Some(a), Some(b)) => seq.ids()[a.min(b)..=a.max(b)].iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn mark_layer(&self, parent: &ParentRef) -> Option<&MarkLayer> {
        self.marks.get(parent)
    }

    /// The mark span currently deciding `mark` on `unit`.
    pub fn mark_winner(&self, unit: &UnitId, mark: MarkType) -> Option<&MarkSpan> {
        let parent = &self.units.get(unit)?.parent;
        let seq = self.sequences.get(parent)?;
        self.marks.get(parent)?.winner(seq, unit, mark)
    }

    /// Effective marks on one character.
    pub fn marks_of(&self, unit: &UnitId) -> BTreeMap<MarkType, MarkValue> {
        MarkType::ALL
            .iter()
            .filter_map(|mark| {
                self.mark_winner(unit, *mark)
                    .filter(|span| !span.value.is_off())
                    .map(|span| (*mark, span.value.clone()))
            })
            .collect()
    }
}

fn write_register(
    registers: &mut BTreeMap<String, LwwRegister<Option<AttrValue>>>,
    key: &str,
    value: Option<AttrValue>,
    stamp: &OpId,
) {
    match registers.get_mut(key) {
        Some(reg) => {
            reg.set(value, stamp.clone());
        }
        None => {
            registers.insert(key.to_string(), LwwRegister::new(value, stamp.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::ReplicaId;

    fn op_id(lamport: u64, replica: &str, seq: u64) -> OpId {
        OpId::new(lamport, ReplicaId::from(replica), seq)
    }

    fn op(id: OpId, kind: OpKind) -> Operation {
        Operation { id, deps: vec![], kind }
    }

    fn text_of(engine: &Engine, parent: &ParentRef) -> String {
        engine
            .children(parent)
            .iter()
            .filter_map(|item| item.unit.as_char())
            .collect()
    }

    fn insert_text(id: OpId, parent: ParentRef, left: Option<UnitId>, text: &str) -> Operation {
        op(
            id,
            OpKind::InsertText {
                parent,
                left,
                right: None,
                text: text.into(),
            },
        )
    }

    #[test]
    fn test_insert_and_delete_text() {
        let mut engine = Engine::new();
        let a = op_id(1, "a", 1);
        engine.apply(&insert_text(a.clone(), ParentRef::Root, None, "Hello"));
        assert_eq!(text_of(&engine, &ParentRef::Root), "Hello");

        engine.apply(&op(
            op_id(2, "a", 2),
            OpKind::Delete {
                targets: vec![a.unit(1), a.unit(2)],
            },
        ));
        assert_eq!(text_of(&engine, &ParentRef::Root), "Hlo");
        assert!(engine.unit(&a.unit(1)).is_some_and(Unit::is_deleted));
    }

    #[test]
    fn test_graphemes_are_units() {
        let mut engine = Engine::new();
        engine.apply(&insert_text(op_id(1, "a", 1), ParentRef::Root, None, "e\u{301}👋🏽!"));
        assert_eq!(engine.children(&ParentRef::Root).len(), 3);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut engine = Engine::new();
        let insert = insert_text(op_id(1, "a", 1), ParentRef::Root, None, "abc");
        assert!(engine.apply(&insert));
        assert!(!engine.apply(&insert));
        assert_eq!(text_of(&engine, &ParentRef::Root), "abc");
    }

    #[test]
    fn test_deleted_node_lifts_concurrent_children() {
        let mut engine = Engine::new();
        let para = op_id(1, "a", 1);
        engine.apply(&op(
            para.clone(),
            OpKind::InsertNode {
                parent: ParentRef::Root,
                left: None,
                right: None,
                node_type: NodeType::Paragraph,
                attrs: BTreeMap::new(),
            },
        ));
        let inner = ParentRef::Node(para.unit(0));
        engine.apply(&insert_text(op_id(2, "a", 2), inner.clone(), None, "old"));

        // Replica a deletes the paragraph and what it saw inside it
        let mut targets = vec![para.unit(0)];
        targets.extend((0..3).map(|i| op_id(2, "a", 2).unit(i)));
        engine.apply(&op(op_id(3, "a", 3), OpKind::Delete { targets }));

        // Replica b concurrently typed inside the paragraph
        engine.apply(&insert_text(
            op_id(3, "b", 1),
            inner,
            Some(op_id(2, "a", 2).unit(2)),
            "new",
        ));

        assert_eq!(text_of(&engine, &ParentRef::Root), "new");
        let items = engine.children(&ParentRef::Root);
        assert!(items.iter().all(|item| item.slot == &para.unit(0)));
    }

    #[test]
    fn test_attribute_lww_any_order() {
        let node = op_id(1, "a", 1);
        let insert = op(
            node.clone(),
            OpKind::InsertNode {
                parent: ParentRef::Root,
                left: None,
                right: None,
                node_type: NodeType::Paragraph,
                attrs: BTreeMap::new(),
            },
        );
        let set = |id: OpId, v: &str| {
            op(
                id,
                OpKind::SetAttribute {
                    target: ParentRef::Node(node.unit(0)),
                    key: "textAlign".into(),
                    value: Some(AttrValue::from(v)),
                },
            )
        };
        let x = set(op_id(2, "a", 2), "center");
        let y = set(op_id(2, "b", 1), "right");

        let mut one = Engine::new();
        let mut two = Engine::new();
        for o in [&insert, &x, &y] {
            one.apply(o);
        }
        for o in [&insert, &y, &x] {
            two.apply(o);
        }
        let target = ParentRef::Node(node.unit(0));
        assert_eq!(one.attribute(&target, "textAlign"), Some(&AttrValue::from("right")));
        assert_eq!(one.attribute(&target, "textAlign"), two.attribute(&target, "textAlign"));
    }

    #[test]
    fn test_retype_and_root_attribute() {
        let mut engine = Engine::new();
        let node = op_id(1, "a", 1);
        engine.apply(&op(
            node.clone(),
            OpKind::InsertNode {
                parent: ParentRef::Root,
                left: None,
                right: None,
                node_type: NodeType::Paragraph,
                attrs: BTreeMap::new(),
            },
        ));
        engine.apply(&op(
            op_id(2, "a", 2),
            OpKind::SetNodeType {
                target: node.unit(0),
                node_type: NodeType::Heading { level: 2 },
            },
        ));
        engine.apply(&op(
            op_id(3, "a", 3),
            OpKind::SetAttribute {
                target: ParentRef::Root,
                key: "leftMargin".into(),
                value: Some(AttrValue::Int(80)),
            },
        ));
        assert_eq!(engine.node_type(&node.unit(0)), Some(NodeType::Heading { level: 2 }));
        assert_eq!(engine.root_attrs().get("leftMargin"), Some(&AttrValue::Int(80)));
    }

    #[test]
    fn test_marks_of_character() {
        let mut engine = Engine::new();
        let a = op_id(1, "a", 1);
        engine.apply(&insert_text(a.clone(), ParentRef::Root, None, "abc"));
        engine.apply(&op(
            op_id(2, "a", 2),
            OpKind::SetMark {
                parent: ParentRef::Root,
                start: a.unit(0),
                end: a.unit(1),
                mark: MarkType::Bold,
                value: MarkValue::On,
            },
        ));
        assert!(engine.marks_of(&a.unit(1)).contains_key(&MarkType::Bold));
        assert!(engine.marks_of(&a.unit(2)).is_empty());
        assert_eq!(engine.range_units(&ParentRef::Root, &a.unit(0), &a.unit(2)).len(), 3);
    }

    #[test]
    fn test_insert_into_unknown_container_is_skipped() {
        let mut engine = Engine::new();
        let ghost = ParentRef::Node(op_id(9, "z", 9).unit(0));
        assert!(engine.apply(&insert_text(op_id(1, "a", 1), ghost, None, "x")));
        assert_eq!(engine.unit_count(), 0);
    }
}
