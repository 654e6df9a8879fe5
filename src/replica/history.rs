//! Undo and redo.
//!
//! Reverting a change never rewrites history: it appends new operations.
//! Anything that moved on since the change was recorded is left alone:
//!
//! - units another replica deleted are not brought back
//! - content whose container is gone is not restored
//! - attributes, node types and marks are only reset while the recorded
//!   operation is still the one deciding their value

use super::{merge_text, merged, Replica};
use crate::crdt::{MarkType, MarkValue, OpId, OpKind, ParentRef, UnitId};
use crate::document::Fragment;
use crate::undo::{Change, Group, RestoreItem};
use std::collections::HashSet;
use tracing::debug;

impl Replica {
    /// Revert the most recent local change group. Returns whether any
    /// operation was emitted.
    pub fn undo(&mut self) -> bool {
        let Some(group) = self.history.take_undo() else {
            return false;
        };
        let inverse = self.revert(group);
        let changed = !inverse.is_empty();
        self.history.push_redo(inverse);
        changed
    }

    /// Re-apply the most recently undone group.
    pub fn redo(&mut self) -> bool {
        let Some(group) = self.history.take_redo() else {
            return false;
        };
        let inverse = self.revert(group);
        let changed = !inverse.is_empty();
        self.history.push_undo(inverse);
        changed
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    fn revert(&mut self, group: Group) -> Group {
        let mut inverse = Vec::new();
        for change in group.into_iter().rev() {
            inverse.extend(self.revert_change(change));
        }
        inverse
    }

    fn revert_change(&mut self, change: Change) -> Vec<Change> {
        match change {
            Change::Inserted { units } => self.revert_insert(units),
            Change::Deleted { items } => self.revert_delete(items),
            Change::AttributeSet {
                target,
                key,
                previous,
                applied,
            } => {
                if self.engine.attribute_stamp(&target, &key) != Some(&applied)
                    || !self.engine.is_live_container(&target)
                {
                    debug!(%target, key = %key, "attribute changed since, skipping revert");
                    return Vec::new();
                }
                let current = self.engine.attribute(&target, &key).cloned();
                let op = self.commit(OpKind::SetAttribute {
                    target: target.clone(),
                    key: key.clone(),
                    value: previous,
                });
                vec![Change::AttributeSet {
                    target,
                    key,
                    previous: current,
                    applied: op.id,
                }]
            }
            Change::Retyped {
                target,
                previous,
                applied,
            } => {
                let live = self.engine.unit(&target).is_some_and(|u| !u.is_deleted());
                if self.engine.node_type_stamp(&target) != Some(&applied) || !live {
                    debug!(%target, "node type changed since, skipping revert");
                    return Vec::new();
                }
                let Some(current) = self.engine.node_type(&target) else {
                    return Vec::new();
                };
                let op = self.commit(OpKind::SetNodeType {
                    target: target.clone(),
                    node_type: previous,
                });
                vec![Change::Retyped {
                    target,
                    previous: current,
                    applied: op.id,
                }]
            }
            Change::MarkSet {
                mark,
                previous,
                applied,
            } => self.revert_marks(mark, previous, &applied),
        }
    }

    /// Delete whichever inserted units are still live.
    fn revert_insert(&mut self, units: Vec<UnitId>) -> Vec<Change> {
        let live: Vec<UnitId> = units
            .into_iter()
            .filter(|id| self.engine.unit(id).is_some_and(|u| !u.is_deleted()))
            .collect();
        if live.is_empty() {
            debug!("inserted content already deleted, nothing to undo");
            return Vec::new();
        }

        let set: HashSet<&UnitId> = live.iter().collect();
        let mut items = Vec::new();
        for id in &live {
            let Some(unit) = self.engine.unit(id) else {
                continue;
            };
            if unit.parent.node().is_some_and(|p| set.contains(p)) {
                continue;
            }
            let mut sources = Vec::new();
            if let Some(fragment) = self.capture(id, &|u: &UnitId| set.contains(u), &mut sources) {
                items.push(RestoreItem {
                    parent: unit.parent.clone(),
                    after: id.clone(),
                    fragment,
                    sources,
                });
            }
        }

        self.commit(OpKind::Delete { targets: live });
        vec![Change::Deleted { items }]
    }

    /// Insert copies of deleted content at its old place.
    fn revert_delete(&mut self, items: Vec<RestoreItem>) -> Vec<Change> {
        let mut restored = Vec::new();
        // (anchor, last unit restored after it)
        let mut last: Option<(UnitId, UnitId)> = None;

        for item in items {
            if !self.engine.is_live_container(&item.parent) {
                debug!(parent = %item.parent, "container deleted, not restoring");
                continue;
            }
            let fragments = self.restorable(item.fragment, &item.sources);
            if fragments.is_empty() {
                debug!(unit = %item.after, "deleted by another replica, not restoring");
                continue;
            }

            let left = match &last {
                Some((anchor, unit)) if anchor == &item.after => unit.clone(),
                _ => item.after.clone(),
            };
            let units = self.insert_fragments(&item.parent, Some(left), &fragments);
            if let Some(top) = units.iter().rev().find(|u| {
                self.engine.unit(u).is_some_and(|unit| unit.parent == item.parent)
            }) {
                last = Some((item.after, top.clone()));
            }
            restored.extend(units);
        }

        if restored.is_empty() {
            return Vec::new();
        }
        vec![Change::Inserted { units: restored }]
    }

    /// Reset a mark on the units it still decides.
    fn revert_marks(&mut self, mark: MarkType, previous: Vec<(UnitId, MarkValue)>, applied: &OpId) -> Vec<Change> {
        // (parent, last index, value, units)
        let mut runs: Vec<(ParentRef, usize, MarkValue, Vec<UnitId>)> = Vec::new();
        let mut applied_value = None;
        for (unit, value) in previous {
            let Some(span) = self.engine.mark_winner(&unit, mark) else {
                continue;
            };
            if &span.op != applied {
                continue;
            }
            applied_value = Some(span.value.clone());
            let Some(u) = self.engine.unit(&unit).filter(|u| !u.is_deleted()) else {
                continue;
            };
            let parent = u.parent.clone();
            let Some(index) = self.engine.sequence(&parent).and_then(|s| s.index_of(&unit)) else {
                continue;
            };
            match runs.last_mut() {
                Some((p, last, v, units)) if *p == parent && *v == value && *last + 1 == index => {
                    *last = index;
                    units.push(unit);
                }
                _ => runs.push((parent, index, value, vec![unit])),
            }
        }

        let Some(applied_value) = applied_value else {
            debug!(mark = mark.name(), "mark overwritten since, skipping revert");
            return Vec::new();
        };
        let mut inverse = Vec::new();
        for (parent, _, value, units) in runs {
            let (Some(start), Some(end)) = (units.first().cloned(), units.last().cloned()) else {
                continue;
            };
            let op = self.commit(OpKind::SetMark {
                parent,
                start,
                end,
                mark,
                value,
            });
            inverse.push(Change::MarkSet {
                mark,
                previous: units.into_iter().map(|u| (u, applied_value.clone())).collect(),
                applied: op.id,
            });
        }
        inverse
    }

    /// The part of a deleted fragment that may come back. Units another
    /// replica deleted are dropped; a dropped node leaves its remaining
    /// content in its place.
    fn restorable(&self, fragment: Fragment, sources: &[UnitId]) -> Vec<Fragment> {
        let me = self.id();
        let keep = |id: &UnitId| !self.engine.unit(id).is_some_and(|u| u.deleted_by_other(me));
        let kept = prune(fragment, &mut sources.iter(), &keep);
        merge_text(kept.into_iter().map(merged).collect())
    }
}

/// Walk `fragment` alongside the pre-order `sources` it was captured from,
/// dropping every fragment whose source `keep` rejects.
fn prune(fragment: Fragment, sources: &mut std::slice::Iter<'_, UnitId>, keep: &dyn Fn(&UnitId) -> bool) -> Vec<Fragment> {
    let kept = sources.next().map_or(true, keep);
    match fragment {
        Fragment::Node {
            node_type,
            attrs,
            children,
        } => {
            let mut inner = Vec::new();
            for child in children {
                inner.extend(prune(child, sources, keep));
            }
            if kept {
                vec![Fragment::Node {
                    node_type,
                    attrs,
                    children: inner,
                }]
            } else {
                inner
            }
        }
        text if kept => vec![text],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use crate::crdt::{AttrValue, MarkType, NodeType, ParentRef};
    use crate::document::{Position, TextRange};
    use crate::Replica;

    #[test]
    fn test_undo_redo_insert() {
        let mut r = Replica::new("a").unwrap();
        r.insert_text(&Position::root(0), "abc").unwrap();
        assert!(r.undo());
        assert_eq!(r.text(), "");
        assert!(r.redo());
        assert_eq!(r.text(), "abc");
        assert!(r.undo());
        assert_eq!(r.text(), "");
    }

    #[test]
    fn test_undo_delete_restores_marks_in_place() {
        let mut r = Replica::new("a").unwrap();
        r.insert_text(&Position::root(0), "abcdef").unwrap();
        r.toggle_mark(&TextRange::new(ParentRef::Root, 2, 4), MarkType::Bold)
            .unwrap();
        r.delete_range(&TextRange::new(ParentRef::Root, 1, 5)).unwrap();
        assert_eq!(r.text(), "af");

        assert!(r.undo());
        assert_eq!(r.text(), "abcdef");
        let bold = r.marks_at(&Position::root(3)).unwrap();
        assert!(bold.contains_key(&MarkType::Bold));
        assert!(r.marks_at(&Position::root(2)).unwrap().is_empty());
    }

    #[test]
    fn test_undo_mark_and_attribute() {
        let mut r = Replica::new("a").unwrap();
        let p = r.insert_paragraph(&Position::root(0)).unwrap();
        let inner = ParentRef::Node(p.clone());
        r.insert_text(&Position::new(inner.clone(), 0), "hey").unwrap();
        r.toggle_mark(&TextRange::new(inner.clone(), 0, 3), MarkType::Italic)
            .unwrap();
        r.set_attribute(&inner, "textAlign", "right".into()).unwrap();
        r.set_block_type(&p, NodeType::Heading { level: 1 }).unwrap();

        assert!(r.undo());
        assert_eq!(r.node_type(&p), Some(NodeType::Paragraph));
        assert!(r.undo());
        assert_eq!(r.attribute(&inner, "textAlign"), Some(AttrValue::from("left")));
        assert!(r.undo());
        assert!(r.marks_at(&Position::new(inner.clone(), 3)).unwrap().is_empty());

        assert!(r.redo());
        assert!(r
            .marks_at(&Position::new(inner, 3))
            .unwrap()
            .contains_key(&MarkType::Italic));
    }

    #[test]
    fn test_undo_of_structural_intent_is_one_step() {
        let mut r = Replica::new("a").unwrap();
        let p = r.insert_paragraph(&Position::root(0)).unwrap();
        r.insert_text(&Position::new(ParentRef::Node(p), 0), "item").unwrap();
        r.toggle_list(&TextRange::new(ParentRef::Root, 0, 1), NodeType::OrderedList)
            .unwrap();

        assert!(r.undo());
        let blocks = r.child_ids(&ParentRef::Root);
        assert_eq!(blocks.len(), 1);
        assert_eq!(r.node_type(&blocks[0]), Some(NodeType::Paragraph));
        assert_eq!(r.text(), "item");
    }

    #[test]
    fn test_nothing_to_undo() {
        let mut r = Replica::new("a").unwrap();
        assert!(!r.undo());
        assert!(!r.redo());
    }
}
