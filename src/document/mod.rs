//! Document tree projection.
//!
//! The materialized, application-visible structure derived from the engine:
//! nested nodes holding runs of identically formatted text. A projection is
//! a pure function of the applied operation set. Maps are ordered, so two
//! replicas holding the same operations serialize byte-identical snapshots.

pub mod render;
pub mod schema;
pub mod seed;

pub use render::render_html;
pub use schema::{Command, Schema};
pub use seed::parse_markup;

use crate::crdt::{AttrValue, Engine, MarkType, MarkValue, NodeType, ParentRef, UnitContent, UnitId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A visible offset inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub parent: ParentRef,
    pub offset: usize,
}

impl Position {
    pub fn new(parent: ParentRef, offset: usize) -> Self {
        Self { parent, offset }
    }

    pub fn root(offset: usize) -> Self {
        Self::new(ParentRef::Root, offset)
    }
}

/// Half-open range `start..end` of visible children of one container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextRange {
    pub parent: ParentRef,
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub fn new(parent: ParentRef, start: usize, end: usize) -> Self {
        Self { parent, start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// A position expressed relative to unit IDs.
///
/// `after` is the unit the position follows (`None` for the start of the
/// container). Unlike a numeric offset it stays meaningful while the
/// document changes around it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Anchor {
    pub parent: ParentRef,
    pub after: Option<UnitId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Anchor,
    pub head: Anchor,
}

impl Selection {
    pub fn collapsed(at: Anchor) -> Self {
        Self {
            anchor: at.clone(),
            head: at,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.head
    }
}

/// Structured content not yet in the document: parsed seed markup, copies
/// of nodes being wrapped, or content restored by undo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text {
        text: String,
        marks: BTreeMap<MarkType, MarkValue>,
    },
    Node {
        node_type: NodeType,
        attrs: BTreeMap<String, AttrValue>,
        children: Vec<Fragment>,
    },
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Fragment::Text {
            text: text.into(),
            marks: BTreeMap::new(),
        }
    }

    pub fn node(node_type: NodeType, children: Vec<Fragment>) -> Self {
        Fragment::Node {
            node_type,
            attrs: BTreeMap::new(),
            children,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, AttrValue>,
    pub content: Vec<Content>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Content {
    Text(TextRun),
    Node(NodeView),
}

/// Consecutive characters sharing the same marks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub marks: BTreeMap<MarkType, MarkValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeView {
    pub id: UnitId,
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, AttrValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Content>,
}

/// Effective marks per sequence position, resolved once per container.
#[derive(Default)]
struct MarkCache {
    resolved: HashMap<ParentRef, Vec<BTreeMap<MarkType, MarkValue>>>,
}

impl MarkCache {
    fn marks(&mut self, engine: &Engine, parent: &ParentRef, unit: &UnitId) -> BTreeMap<MarkType, MarkValue> {
        let Some(seq) = engine.sequence(parent) else {
            return BTreeMap::new();
        };
        let resolved = self.resolved.entry(parent.clone()).or_insert_with(|| {
            match engine.mark_layer(parent) {
                Some(layer) => layer
                    .resolve(seq)
                    .iter()
                    .map(crate::crdt::marks::effective)
                    .collect(),
                None => Vec::new(),
            }
        });
        seq.index_of(unit)
            .and_then(|i| resolved.get(i).cloned())
            .unwrap_or_default()
    }
}

impl DocumentSnapshot {
    /// Project the live document out of the engine.
    pub fn project(engine: &Engine) -> Self {
        let mut cache = MarkCache::default();
        DocumentSnapshot {
            attrs: engine.root_attrs(),
            content: project_children(engine, &ParentRef::Root, &mut cache),
        }
    }

    /// Plain text: one line per text block.
    pub fn text(&self) -> String {
        let mut lines = Vec::new();
        block_lines(&self.content, &mut lines);
        lines.join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn project_children(engine: &Engine, parent: &ParentRef, cache: &mut MarkCache) -> Vec<Content> {
    let mut out: Vec<Content> = Vec::new();
    for item in engine.children(parent) {
        let unit = item.unit;
        match &unit.content {
            UnitContent::Char(grapheme) => {
                let marks = cache.marks(engine, &unit.parent, &unit.id);
                if let Some(Content::Text(run)) = out.last_mut() {
                    if run.marks == marks {
                        run.text.push_str(grapheme);
                        continue;
                    }
                }
                out.push(Content::Text(TextRun {
                    text: grapheme.clone(),
                    marks,
                }));
            }
            UnitContent::Node(state) => {
                let content = project_children(engine, &ParentRef::Node(unit.id.clone()), cache);
                out.push(Content::Node(NodeView {
                    id: unit.id.clone(),
                    node_type: *state.node_type.get(),
                    attrs: state.live_attrs(),
                    content,
                }));
            }
        }
    }
    out
}

fn block_lines(content: &[Content], lines: &mut Vec<String>) {
    let mut line: Option<String> = None;
    for item in content {
        match item {
            Content::Text(run) => line.get_or_insert_with(String::new).push_str(&run.text),
            Content::Node(node) if node.node_type.is_inline() => {
                line.get_or_insert_with(String::new).push('\n');
            }
            Content::Node(node) => {
                if let Some(done) = line.take() {
                    lines.push(done);
                }
                if node.node_type.is_textblock() {
                    lines.push(inline_text(&node.content));
                } else {
                    block_lines(&node.content, lines);
                }
            }
        }
    }
    if let Some(done) = line {
        lines.push(done);
    }
}

fn inline_text(content: &[Content]) -> String {
    let mut out = String::new();
    for item in content {
        match item {
            Content::Text(run) => out.push_str(&run.text),
            Content::Node(node) if node.node_type.is_inline() => out.push('\n'),
            Content::Node(node) => out.push_str(&inline_text(&node.content)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::{OpId, OpKind, Operation, ReplicaId};

    fn apply(engine: &mut Engine, lamport: u64, kind: OpKind) -> OpId {
        let id = OpId::new(lamport, ReplicaId::from("a"), lamport);
        engine.apply(&Operation {
            id: id.clone(),
            deps: vec![],
            kind,
        });
        id
    }

    fn paragraph(engine: &mut Engine, lamport: u64, left: Option<UnitId>) -> UnitId {
        apply(
            engine,
            lamport,
            OpKind::InsertNode {
                parent: ParentRef::Root,
                left,
                right: None,
                node_type: NodeType::Paragraph,
                attrs: BTreeMap::new(),
            },
        )
        .unit(0)
    }

    fn text(engine: &mut Engine, lamport: u64, parent: &UnitId, s: &str) -> OpId {
        apply(
            engine,
            lamport,
            OpKind::InsertText {
                parent: ParentRef::Node(parent.clone()),
                left: None,
                right: None,
                text: s.into(),
            },
        )
    }

    #[test]
    fn test_runs_split_on_marks() {
        let mut engine = Engine::new();
        let p = paragraph(&mut engine, 1, None);
        let t = text(&mut engine, 2, &p, "Hello");
        apply(
            &mut engine,
            3,
            OpKind::SetMark {
                parent: ParentRef::Node(p.clone()),
                start: t.unit(0),
                end: t.unit(1),
                mark: MarkType::Bold,
                value: MarkValue::On,
            },
        );

        let snapshot = DocumentSnapshot::project(&engine);
        let Content::Node(node) = &snapshot.content[0] else {
            panic!("expected a paragraph");
        };
        assert_eq!(node.content.len(), 2);
        assert_eq!(
            node.content[0],
            Content::Text(TextRun {
                text: "He".into(),
                marks: BTreeMap::from([(MarkType::Bold, MarkValue::On)]),
            })
        );
        assert_eq!(snapshot.text(), "Hello");
    }

    #[test]
    fn test_blocks_join_with_newlines() {
        let mut engine = Engine::new();
        let first = paragraph(&mut engine, 1, None);
        let second = paragraph(&mut engine, 2, Some(first.clone()));
        text(&mut engine, 3, &first, "one");
        text(&mut engine, 4, &second, "two");
        assert_eq!(DocumentSnapshot::project(&engine).text(), "one\ntwo");
    }

    #[test]
    fn test_snapshot_json_is_stable() {
        let mut engine = Engine::new();
        let p = paragraph(&mut engine, 1, None);
        text(&mut engine, 2, &p, "x");
        let a = DocumentSnapshot::project(&engine).to_json().unwrap();
        let b = DocumentSnapshot::project(&engine.clone()).to_json().unwrap();
        assert_eq!(a, b);
        assert!(a.contains(r#""kind":"node""#));
    }

    #[test]
    fn test_selection_collapsed() {
        let at = Anchor {
            parent: ParentRef::Root,
            after: None,
        };
        assert!(Selection::collapsed(at).is_collapsed());
    }
}
