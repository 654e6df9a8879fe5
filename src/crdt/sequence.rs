//! Fugue sequence: ordering of the units inside one container.
//!
//! Every unit records the units it was inserted between (left and right
//! origin). From these, each replica rebuilds the same tree:
//!
//! - If the left origin is an ancestor of the right origin, the new unit
//!   becomes a left child of the right origin.
//! - Otherwise it becomes a right child of the left origin.
//!
//! A missing left origin stands for the virtual root, which is an ancestor of
//! every unit. Siblings on the same side are ordered ascending by [`UnitId`],
//! so among concurrent inserts at the same position the one with the higher
//! `(lamport, replica)` lands later. Document order is an in-order traversal
//! of the tree, tombstones included; filtering deleted units is the caller's
//! business.
//!
//! # References
//!
//! - **Paper**: "Fugue: A CRDT for Collaborative Text Editing" (arXiv:2305.00583)

use super::id::UnitId;
use std::cell::OnceCell;
use std::collections::HashMap;

/// Side of a node in the Fugue tree (left or right child of parent)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone)]
struct TreeNode {
    parent: Option<UnitId>,
    left: Vec<UnitId>,
    right: Vec<UnitId>,
}

/// Cached document order.
#[derive(Debug, Clone, Default)]
struct Order {
    ids: Vec<UnitId>,
    index: HashMap<UnitId, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Sequence {
    nodes: HashMap<UnitId, TreeNode>,
    /// Right children of the virtual root
    roots: Vec<UnitId>,
    order: OnceCell<Order>,
}

fn insert_sorted(children: &mut Vec<UnitId>, id: UnitId) {
    let at = children.partition_point(|c| c < &id);
    children.insert(at, id);
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &UnitId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Integrate a unit inserted between `left` and `right`.
    ///
    /// Origins must already be integrated; unknown origins are treated as
    /// absent. Re-inserting a known unit is a no-op.
    pub fn insert(&mut self, id: UnitId, left: Option<&UnitId>, right: Option<&UnitId>) {
        if self.nodes.contains_key(&id) {
            return;
        }
        let left = left.filter(|l| self.nodes.contains_key(*l));
        let right = right.filter(|r| self.nodes.contains_key(*r));

        let (parent, side) = match (left, right) {
            (None, None) => (None, Side::Right),
            (Some(a), None) => (Some(a.clone()), Side::Right),
            (None, Some(b)) => (Some(b.clone()), Side::Left),
            (Some(a), Some(b)) => {
                if self.is_ancestor(a, b) {
                    (Some(b.clone()), Side::Left)
                } else {
                    (Some(a.clone()), Side::Right)
                }
            }
        };

        match &parent {
            None => insert_sorted(&mut self.roots, id.clone()),
            Some(p) => {
                if let Some(node) = self.nodes.get_mut(p) {
                    match side {
                        Side::Left => insert_sorted(&mut node.left, id.clone()),
                        Side::Right => insert_sorted(&mut node.right, id.clone()),
                    }
                }
            }
        }

        self.nodes.insert(
            id,
            TreeNode {
                parent,
                left: Vec::new(),
                right: Vec::new(),
            },
        );
        self.order.take();
    }

    /// Walks up from `b` looking for `a`.
    fn is_ancestor(&self, a: &UnitId, b: &UnitId) -> bool {
        let mut current = Some(b);
        while let Some(id) = current {
            if id == a {
                return true;
            }
            current = self.nodes.get(id).and_then(|n| n.parent.as_ref());
        }
        false
    }

    fn order(&self) -> &Order {
        self.order.get_or_init(|| {
            enum Step<'a> {
                Visit(&'a UnitId),
                Emit(&'a UnitId),
            }

            let mut ids = Vec::with_capacity(self.nodes.len());
            let mut stack: Vec<Step<'_>> = self.roots.iter().rev().map(Step::Visit).collect();

            while let Some(step) = stack.pop() {
                match step {
                    Step::Emit(id) => ids.push(id.clone()),
                    Step::Visit(id) => {
                        let Some(node) = self.nodes.get(id) else {
                            continue;
                        };
                        stack.extend(node.right.iter().rev().map(Step::Visit));
                        stack.push(Step::Emit(id));
                        stack.extend(node.left.iter().rev().map(Step::Visit));
                    }
                }
            }

            let index = ids
                .iter()
                .enumerate()
                .map(|(i, id)| (id.clone(), i))
                .collect();
            Order { ids, index }
        })
    }

    /// All units in document order, tombstones included.
    pub fn ids(&self) -> &[UnitId] {
        &self.order().ids
    }

    /// Position of `id` in document order.
    pub fn index_of(&self, id: &UnitId) -> Option<usize> {
        self.order().index.get(id).copied()
    }

    /// The unit immediately after `id` in document order; the first unit
    /// when `id` is `None`.
    pub fn next_after(&self, id: Option<&UnitId>) -> Option<&UnitId> {
        let ids = self.ids();
        match id {
            None => ids.first(),
            Some(id) => self.index_of(id).and_then(|i| ids.get(i + 1)),
        }
    }

    /// The unit immediately before `id` in document order.
    pub fn prev_before(&self, id: &UnitId) -> Option<&UnitId> {
        let i = self.index_of(id)?;
        i.checked_sub(1).and_then(|p| self.ids().get(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::{OpId, ReplicaId};

    fn uid(lamport: u64, replica: &str, offset: u32) -> UnitId {
        OpId::new(lamport, ReplicaId::from(replica), lamport).unit(offset)
    }

    /// Insert a run the way a local edit does: first unit between the
    /// origins, every following unit after its predecessor.
    fn insert_run(seq: &mut Sequence, ids: &[UnitId], left: Option<&UnitId>, right: Option<&UnitId>) {
        let mut prev = left.cloned();
        for id in ids {
            seq.insert(id.clone(), prev.as_ref(), right);
            prev = Some(id.clone());
        }
    }

    #[test]
    fn test_sequential_inserts() {
        let mut seq = Sequence::new();
        let run: Vec<_> = (0..5).map(|i| uid(1, "a", i)).collect();
        insert_run(&mut seq, &run, None, None);
        assert_eq!(seq.ids(), run.as_slice());
    }

    #[test]
    fn test_insert_in_middle() {
        let mut seq = Sequence::new();
        let (x, y) = (uid(1, "a", 0), uid(1, "a", 1));
        insert_run(&mut seq, &[x.clone(), y.clone()], None, None);

        let z = uid(2, "a", 0);
        seq.insert(z.clone(), Some(&x), Some(&y));
        assert_eq!(seq.ids(), &[x, z, y]);
    }

    #[test]
    fn test_concurrent_same_position_higher_id_later() {
        let base = uid(1, "a", 0);
        let from_b = uid(2, "b", 0);
        let from_c = uid(2, "c", 0);

        let mut one = Sequence::new();
        one.insert(base.clone(), None, None);
        one.insert(from_c.clone(), Some(&base), None);
        one.insert(from_b.clone(), Some(&base), None);

        let mut two = Sequence::new();
        two.insert(base.clone(), None, None);
        two.insert(from_b.clone(), Some(&base), None);
        two.insert(from_c.clone(), Some(&base), None);

        assert_eq!(one.ids(), two.ids());
        assert_eq!(one.ids(), &[base, from_b, from_c]);
    }

    #[test]
    fn test_concurrent_runs_do_not_interleave() {
        let base = uid(1, "a", 0);
        let run_b: Vec<_> = (0..3).map(|i| uid(2, "b", i)).collect();
        let run_c: Vec<_> = (0..3).map(|i| uid(2, "c", i)).collect();

        let mut seq = Sequence::new();
        seq.insert(base.clone(), None, None);
        insert_run(&mut seq, &run_c, Some(&base), None);
        insert_run(&mut seq, &run_b, Some(&base), None);

        let mut expected = vec![base];
        expected.extend(run_b);
        expected.extend(run_c);
        assert_eq!(seq.ids(), expected.as_slice());
    }

    #[test]
    fn test_insert_at_start() {
        let mut seq = Sequence::new();
        let x = uid(1, "a", 0);
        seq.insert(x.clone(), None, None);
        let y = uid(2, "a", 0);
        seq.insert(y.clone(), None, Some(&x));
        assert_eq!(seq.ids(), &[y.clone(), x.clone()]);
        assert_eq!(seq.next_after(None), Some(&y));
        assert_eq!(seq.prev_before(&x), Some(&y));
        assert_eq!(seq.index_of(&x), Some(1));
    }

    #[test]
    fn test_reinsert_is_noop() {
        let mut seq = Sequence::new();
        let x = uid(1, "a", 0);
        seq.insert(x.clone(), None, None);
        seq.insert(x.clone(), None, None);
        assert_eq!(seq.len(), 1);
    }

    #[test]
    fn test_deep_chain_traversal() {
        let mut seq = Sequence::new();
        let run: Vec<_> = (0..20_000).map(|i| uid(1, "a", i)).collect();
        insert_run(&mut seq, &run, None, None);
        assert_eq!(seq.ids().len(), 20_000);
        assert_eq!(seq.ids().last(), run.last());
    }
}
