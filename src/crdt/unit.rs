//! Units of replicated content and the value types they carry.

use super::id::{OpId, ParentRef, ReplicaId, UnitId};
use super::register::LwwRegister;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Structural node types of the document tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeType {
    Paragraph,
    Heading { level: u8 },
    BulletList,
    OrderedList,
    TaskList,
    ListItem,
    TaskItem,
    Table,
    TableRow,
    TableCell,
    TableHeader,
    Image,
    Blockquote,
    HorizontalRule,
    HardBreak,
}

impl NodeType {
    /// Every node type known to the engine, headings expanded per level.
    pub const ALL: [NodeType; 19] = [
        NodeType::Paragraph,
        NodeType::Heading { level: 1 },
        NodeType::Heading { level: 2 },
        NodeType::Heading { level: 3 },
        NodeType::Heading { level: 4 },
        NodeType::Heading { level: 5 },
        NodeType::BulletList,
        NodeType::OrderedList,
        NodeType::TaskList,
        NodeType::ListItem,
        NodeType::TaskItem,
        NodeType::Table,
        NodeType::TableRow,
        NodeType::TableCell,
        NodeType::TableHeader,
        NodeType::Image,
        NodeType::Blockquote,
        NodeType::HorizontalRule,
        NodeType::HardBreak,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NodeType::Paragraph => "paragraph",
            NodeType::Heading { .. } => "heading",
            NodeType::BulletList => "bullet_list",
            NodeType::OrderedList => "ordered_list",
            NodeType::TaskList => "task_list",
            NodeType::ListItem => "list_item",
            NodeType::TaskItem => "task_item",
            NodeType::Table => "table",
            NodeType::TableRow => "table_row",
            NodeType::TableCell => "table_cell",
            NodeType::TableHeader => "table_header",
            NodeType::Image => "image",
            NodeType::Blockquote => "blockquote",
            NodeType::HorizontalRule => "horizontal_rule",
            NodeType::HardBreak => "hard_break",
        }
    }

    /// Blocks whose children are inline text (paragraphs and headings).
    pub fn is_textblock(&self) -> bool {
        matches!(self, NodeType::Paragraph | NodeType::Heading { .. })
    }

    pub fn is_list(&self) -> bool {
        matches!(
            self,
            NodeType::BulletList | NodeType::OrderedList | NodeType::TaskList
        )
    }

    /// Leaf nodes never hold children.
    pub fn is_atom(&self) -> bool {
        matches!(
            self,
            NodeType::Image | NodeType::HorizontalRule | NodeType::HardBreak
        )
    }

    /// Whether the node renders inline, within a run of text.
    pub fn is_inline(&self) -> bool {
        matches!(self, NodeType::HardBreak)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Heading { level } => write!(f, "heading{}", level),
            other => f.write_str(other.name()),
        }
    }
}

/// Attribute value stored in a per-key LWW register.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(b) => write!(f, "{}", b),
            AttrValue::Int(n) => write!(f, "{}", n),
            AttrValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

/// Inline formatting applied over runs of characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkType {
    Bold,
    Italic,
    Underline,
    Strike,
    Code,
    Color,
    Highlight,
    FontFamily,
    FontSize,
    Link,
}

impl MarkType {
    pub const ALL: [MarkType; 10] = [
        MarkType::Bold,
        MarkType::Italic,
        MarkType::Underline,
        MarkType::Strike,
        MarkType::Code,
        MarkType::Color,
        MarkType::Highlight,
        MarkType::FontFamily,
        MarkType::FontSize,
        MarkType::Link,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MarkType::Bold => "bold",
            MarkType::Italic => "italic",
            MarkType::Underline => "underline",
            MarkType::Strike => "strike",
            MarkType::Code => "code",
            MarkType::Color => "color",
            MarkType::Highlight => "highlight",
            MarkType::FontFamily => "font_family",
            MarkType::FontSize => "font_size",
            MarkType::Link => "link",
        }
    }
}

/// Payload of a set-mark operation. `Off` is the unset operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkValue {
    On,
    Value(String),
    Off,
}

impl MarkValue {
    pub fn is_off(&self) -> bool {
        matches!(self, MarkValue::Off)
    }
}

/// Replicated state of a node unit.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub node_type: LwwRegister<NodeType>,
    pub attrs: BTreeMap<String, LwwRegister<Option<AttrValue>>>,
}

impl NodeState {
    pub fn new(node_type: NodeType, attrs: BTreeMap<String, AttrValue>, stamp: &OpId) -> Self {
        let attrs = attrs
            .into_iter()
            .map(|(k, v)| (k, LwwRegister::new(Some(v), stamp.clone())))
            .collect();
        Self {
            node_type: LwwRegister::new(node_type, stamp.clone()),
            attrs,
        }
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key).and_then(|reg| reg.get().as_ref())
    }

    /// Attributes that currently hold a value.
    pub fn live_attrs(&self) -> BTreeMap<String, AttrValue> {
        self.attrs
            .iter()
            .filter_map(|(k, reg)| reg.get().as_ref().map(|v| (k.clone(), v.clone())))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub enum UnitContent {
    /// One grapheme cluster
    Char(String),
    Node(NodeState),
}

/// One unit of replicated content.
///
/// Units are never removed. A delete operation records its ID in
/// `deleted_by`, turning the unit into a tombstone that stays resolvable as
/// an origin for later inserts.
#[derive(Debug, Clone)]
pub struct Unit {
    pub id: UnitId,
    pub parent: ParentRef,
    pub content: UnitContent,
    pub deleted_by: BTreeSet<OpId>,
}

impl Unit {
    pub fn is_deleted(&self) -> bool {
        !self.deleted_by.is_empty()
    }

    /// True if some replica other than `replica` deleted this unit.
    pub fn deleted_by_other(&self, replica: &ReplicaId) -> bool {
        self.deleted_by.iter().any(|op| &op.replica != replica)
    }

    pub fn as_node(&self) -> Option<&NodeState> {
        match &self.content {
            UnitContent::Node(state) => Some(state),
            UnitContent::Char(_) => None,
        }
    }

    pub fn as_char(&self) -> Option<&str> {
        match &self.content {
            UnitContent::Char(text) => Some(text),
            UnitContent::Node(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_serialization() {
        let json = serde_json::to_string(&NodeType::Heading { level: 2 }).unwrap();
        assert_eq!(json, r#"{"type":"heading","level":2}"#);
        let json = serde_json::to_string(&NodeType::Paragraph).unwrap();
        assert_eq!(json, r#"{"type":"paragraph"}"#);
    }

    #[test]
    fn test_attr_value_untagged() {
        let v: AttrValue = serde_json::from_str("56").unwrap();
        assert_eq!(v, AttrValue::Int(56));
        let v: AttrValue = serde_json::from_str("\"center\"").unwrap();
        assert_eq!(v.as_str(), Some("center"));
    }

    #[test]
    fn test_mark_type_as_map_key() {
        let mut map = BTreeMap::new();
        map.insert(MarkType::FontSize, "16px");
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"font_size":"16px"}"#);
    }

    #[test]
    fn test_deleted_by_other() {
        let stamp = OpId::new(1, ReplicaId::from("a"), 1);
        let mut unit = Unit {
            id: stamp.unit(0),
            parent: ParentRef::Root,
            content: UnitContent::Char("x".into()),
            deleted_by: BTreeSet::new(),
        };
        assert!(!unit.is_deleted());

        unit.deleted_by.insert(OpId::new(2, ReplicaId::from("a"), 2));
        assert!(unit.is_deleted());
        assert!(!unit.deleted_by_other(&ReplicaId::from("a")));
        assert!(unit.deleted_by_other(&ReplicaId::from("b")));
    }
}
