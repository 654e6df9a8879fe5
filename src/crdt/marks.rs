//! Mark layer: ID-anchored inline formatting.
//!
//! Mark operations are never removed. For every character and mark type the
//! covering span with the greatest [`OpId`] decides the outcome, and a
//! winning `Off` span suppresses the mark. Anchoring spans to unit IDs keeps
//! them valid while concurrent edits shift numeric offsets around.

use super::id::{OpId, UnitId};
use super::sequence::Sequence;
use super::unit::{MarkType, MarkValue};
use std::collections::BTreeMap;

/// One applied set-mark operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkSpan {
    pub op: OpId,
    pub start: UnitId,
    pub end: UnitId,
    pub mark: MarkType,
    pub value: MarkValue,
}

/// Winning span per mark type for each position of a sequence.
pub type Resolved<'a> = Vec<BTreeMap<MarkType, &'a MarkSpan>>;

/// All mark spans anchored inside one container.
#[derive(Debug, Clone, Default)]
pub struct MarkLayer {
    spans: Vec<MarkSpan>,
}

impl MarkLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, span: MarkSpan) {
        if self.spans.iter().any(|s| s.op == span.op) {
            return;
        }
        self.spans.push(span);
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Resolve the winning span of every mark type at every position of
    /// `seq`, indexed like [`Sequence::ids`].
    pub fn resolve<'a>(&'a self, seq: &Sequence) -> Resolved<'a> {
        let mut resolved: Resolved<'a> = vec![BTreeMap::new(); seq.len()];
        for span in &self.spans {
            let (Some(a), Some(b)) = (seq.index_of(&span.start), seq.index_of(&span.end)) else {
                continue;
            };
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            for slot in &mut resolved[lo..=hi] {
                let wins = slot
                    .get(&span.mark)
                    .map_or(true, |current| span.op > current.op);
                if wins {
                    slot.insert(span.mark, span);
                }
            }
        }
        resolved
    }

    /// The span deciding `mark` on `unit`, if any covers it.
    pub fn winner<'a>(&'a self, seq: &Sequence, unit: &UnitId, mark: MarkType) -> Option<&'a MarkSpan> {
        let at = seq.index_of(unit)?;
        self.spans
            .iter()
            .filter(|s| s.mark == mark)
            .filter(|s| match (seq.index_of(&s.start), seq.index_of(&s.end)) {
                (Some(a), Some(b)) => a.min(b) <= at && at <= a.max(b),
                _ => false,
            })
            .max_by(|x, y| x.op.cmp(&y.op))
    }
}

/// Effective marks from a resolved slot: `Off` winners are dropped.
pub fn effective(slot: &BTreeMap<MarkType, &MarkSpan>) -> BTreeMap<MarkType, MarkValue> {
    slot.iter()
        .filter(|(_, span)| !span.value.is_off())
        .map(|(mark, span)| (*mark, span.value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::ReplicaId;

    fn op(lamport: u64, replica: &str) -> OpId {
        OpId::new(lamport, ReplicaId::from(replica), lamport)
    }

    fn five_chars() -> (Sequence, Vec<UnitId>) {
        let base = op(1, "a");
        let ids: Vec<_> = (0..5).map(|i| base.unit(i)).collect();
        let mut seq = Sequence::new();
        let mut prev: Option<UnitId> = None;
        for id in &ids {
            seq.insert(id.clone(), prev.as_ref(), None);
            prev = Some(id.clone());
        }
        (seq, ids)
    }

    fn span(op: OpId, start: &UnitId, end: &UnitId, mark: MarkType, value: MarkValue) -> MarkSpan {
        MarkSpan {
            op,
            start: start.clone(),
            end: end.clone(),
            mark,
            value,
        }
    }

    #[test]
    fn test_span_covers_inclusive_range() {
        let (seq, ids) = five_chars();
        let mut layer = MarkLayer::new();
        layer.add(span(op(2, "a"), &ids[1], &ids[3], MarkType::Bold, MarkValue::On));

        let resolved = layer.resolve(&seq);
        let bold: Vec<bool> = resolved
            .iter()
            .map(|slot| effective(slot).contains_key(&MarkType::Bold))
            .collect();
        assert_eq!(bold, vec![false, true, true, true, false]);
    }

    #[test]
    fn test_later_unset_suppresses_earlier_set() {
        let (seq, ids) = five_chars();
        let mut layer = MarkLayer::new();
        layer.add(span(op(3, "b"), &ids[2], &ids[2], MarkType::Italic, MarkValue::Off));
        layer.add(span(op(2, "a"), &ids[0], &ids[4], MarkType::Italic, MarkValue::On));

        let resolved = layer.resolve(&seq);
        assert!(effective(&resolved[1]).contains_key(&MarkType::Italic));
        assert!(!effective(&resolved[2]).contains_key(&MarkType::Italic));
        assert_eq!(
            layer.winner(&seq, &ids[2], MarkType::Italic).map(|s| &s.op),
            Some(&op(3, "b"))
        );
    }

    #[test]
    fn test_concurrent_values_resolve_by_op_id() {
        let (seq, ids) = five_chars();
        let mut layer = MarkLayer::new();
        layer.add(span(op(4, "b"), &ids[0], &ids[4], MarkType::Color, MarkValue::Value("red".into())));
        layer.add(span(op(4, "a"), &ids[0], &ids[4], MarkType::Color, MarkValue::Value("blue".into())));

        let resolved = layer.resolve(&seq);
        assert_eq!(
            effective(&resolved[0]).get(&MarkType::Color),
            Some(&MarkValue::Value("red".into()))
        );
    }

    #[test]
    fn test_duplicate_span_ignored() {
        let (_, ids) = five_chars();
        let mut layer = MarkLayer::new();
        let s = span(op(2, "a"), &ids[0], &ids[1], MarkType::Bold, MarkValue::On);
        layer.add(s.clone());
        layer.add(s);
        assert_eq!(layer.len(), 1);
    }
}
