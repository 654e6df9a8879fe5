//! Operations: the immutable, replicated unit of change.

use super::id::{OpId, ParentRef, UnitId};
use super::unit::{AttrValue, MarkType, MarkValue, NodeType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A causality-stamped operation.
///
/// Positions are relational: `left`/`right` name the units the insertion
/// was made between, never numeric offsets. `deps` lists every operation
/// that must be applied before this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OpId,
    pub deps: Vec<OpId>,
    pub kind: OpKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpKind {
    /// Insert a run of characters; one unit per grapheme cluster.
    InsertText {
        parent: ParentRef,
        left: Option<UnitId>,
        right: Option<UnitId>,
        text: String,
    },
    /// Insert a node boundary (paragraph, heading, table cell, image ...).
    InsertNode {
        parent: ParentRef,
        left: Option<UnitId>,
        right: Option<UnitId>,
        node_type: NodeType,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attrs: BTreeMap<String, AttrValue>,
    },
    /// Tombstone the targeted units.
    Delete { targets: Vec<UnitId> },
    /// Write one attribute register; `None` resets the key to its default.
    SetAttribute {
        target: ParentRef,
        key: String,
        value: Option<AttrValue>,
    },
    /// Write the node-type register (paragraph/heading conversion).
    SetNodeType { target: UnitId, node_type: NodeType },
    /// Set or unset a mark over the inclusive unit range `start..=end`.
    SetMark {
        parent: ParentRef,
        start: UnitId,
        end: UnitId,
        mark: MarkType,
        value: MarkValue,
    },
}

impl OpKind {
    /// Every unit this operation refers to.
    pub fn references(&self) -> Vec<&UnitId> {
        let mut refs = Vec::new();
        match self {
            OpKind::InsertText {
                parent, left, right, ..
            }
            | OpKind::InsertNode {
                parent, left, right, ..
            } => {
                refs.extend(parent.node());
                refs.extend(left.iter());
                refs.extend(right.iter());
            }
            OpKind::Delete { targets } => refs.extend(targets.iter()),
            OpKind::SetAttribute { target, .. } => refs.extend(target.node()),
            OpKind::SetNodeType { target, .. } => refs.push(target),
            OpKind::SetMark {
                parent, start, end, ..
            } => {
                refs.extend(parent.node());
                refs.push(start);
                refs.push(end);
            }
        }
        refs
    }

    pub fn name(&self) -> &'static str {
        match self {
            OpKind::InsertText { .. } => "insert_text",
            OpKind::InsertNode { .. } => "insert_node",
            OpKind::Delete { .. } => "delete",
            OpKind::SetAttribute { .. } => "set_attribute",
            OpKind::SetNodeType { .. } => "set_node_type",
            OpKind::SetMark { .. } => "set_mark",
        }
    }
}
