//! Closed registry of node, mark and attribute descriptors.
//!
//! The registry is built once by [`Schema::standard`] and validated before
//! use: every node type and mark type must have exactly one descriptor and
//! no tag or attribute key may be registered twice. Each descriptor exposes
//! three capabilities:
//!
//! - **parse**: markup tag (and `data-type`) to node or mark
//! - **render**: node or mark back to its markup tag
//! - **commands**: which editing intents a node type accepts
//!
//! The registry validates local intents and seed input. It never rejects
//! remote operations.

use crate::crdt::{AttrValue, MarkType, MarkValue, NodeType};
use crate::error::SchemaError;
use std::collections::HashSet;

pub const FONT_FAMILIES: [&str; 5] = ["Arial", "Times New Roman", "Courier New", "Georgia", "Verdana"];
pub const LINE_HEIGHTS: [&str; 5] = ["normal", "1", "1.15", "1.5", "2"];
pub const TEXT_ALIGNMENTS: [&str; 4] = ["left", "center", "right", "justify"];
pub const DEFAULT_FONT_SIZE: &str = "16px";
pub const DEFAULT_LINK_PROTOCOL: &str = "https";

/// Page geometry, in pixels.
pub const PAGE_WIDTH: i64 = 816;
pub const DEFAULT_MARGIN: i64 = 56;
/// Minimum distance between the left and right margin markers
pub const MIN_CONTENT_WIDTH: i64 = 100;

pub const LEFT_MARGIN: &str = "leftMargin";
pub const RIGHT_MARGIN: &str = "rightMargin";

/// Default rendered font size of each heading level.
pub fn heading_font_size(level: u8) -> &'static str {
    match level {
        1 => "32px",
        2 => "24px",
        3 => "20px",
        4 => "18px",
        _ => "16px",
    }
}

/// Editing intents gated by node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    InsertText,
    SetBlockType,
    ToggleList,
    Wrap,
    InsertTable,
    InsertImage,
    SetAttribute,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::InsertText => "insert_text",
            Command::SetBlockType => "set_block_type",
            Command::ToggleList => "toggle_list",
            Command::Wrap => "wrap",
            Command::InsertTable => "insert_table",
            Command::InsertImage => "insert_image",
            Command::SetAttribute => "set_attribute",
        }
    }
}

const TEXTBLOCK_COMMANDS: &[Command] = &[
    Command::InsertText,
    Command::SetBlockType,
    Command::ToggleList,
    Command::Wrap,
    Command::SetAttribute,
];

#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub node_type: NodeType,
    pub tag: &'static str,
    /// Distinguishes node types sharing a tag (`<ul data-type="taskList">`)
    pub data_type: Option<&'static str>,
    pub commands: &'static [Command],
}

#[derive(Debug, Clone)]
pub struct MarkSpec {
    pub mark: MarkType,
    pub tag: &'static str,
    /// Additional tags parsed as this mark
    pub aliases: &'static [&'static str],
    /// CSS property carrying the value, for marks rendered as styled spans
    pub style: Option<&'static str>,
    /// Whether the mark carries a value (color, font, href ...)
    pub valued: bool,
}

/// Attribute default without allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticValue {
    Text(&'static str),
    Int(i64),
    Bool(bool),
}

impl StaticValue {
    pub fn to_value(self) -> AttrValue {
        match self {
            StaticValue::Text(s) => AttrValue::Text(s.to_string()),
            StaticValue::Int(n) => AttrValue::Int(n),
            StaticValue::Bool(b) => AttrValue::Bool(b),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AttrKind {
    OneOf(&'static [&'static str]),
    Text,
    Bool,
    IntRange { min: i64, max: i64 },
}

impl AttrKind {
    fn accepts(&self, value: &AttrValue) -> bool {
        match (self, value) {
            (AttrKind::OneOf(options), AttrValue::Text(s)) => options.contains(&s.as_str()),
            (AttrKind::Text, AttrValue::Text(s)) => !s.is_empty(),
            (AttrKind::Bool, AttrValue::Bool(_)) => true,
            (AttrKind::IntRange { min, max }, AttrValue::Int(n)) => (*min..=*max).contains(n),
            _ => false,
        }
    }
}

/// Where an attribute may be set.
#[derive(Debug, Clone, Copy)]
pub enum AttrScope {
    Root,
    TextBlocks,
    Nodes(&'static [&'static str]),
}

impl AttrScope {
    fn covers(&self, target: Option<&NodeType>) -> bool {
        match (self, target) {
            (AttrScope::Root, None) => true,
            (AttrScope::TextBlocks, Some(t)) => t.is_textblock(),
            (AttrScope::Nodes(names), Some(t)) => names.contains(&t.name()),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttributeSpec {
    pub key: &'static str,
    pub scope: AttrScope,
    pub kind: AttrKind,
    pub default: Option<StaticValue>,
}

fn node(
    node_type: NodeType,
    tag: &'static str,
    data_type: Option<&'static str>,
    commands: &'static [Command],
) -> NodeSpec {
    NodeSpec {
        node_type,
        tag,
        data_type,
        commands,
    }
}

fn heading(level: u8, tag: &'static str) -> NodeSpec {
    node(NodeType::Heading { level }, tag, None, TEXTBLOCK_COMMANDS)
}

fn mark(
    mark: MarkType,
    tag: &'static str,
    aliases: &'static [&'static str],
    style: Option<&'static str>,
    valued: bool,
) -> MarkSpec {
    MarkSpec {
        mark,
        tag,
        aliases,
        style,
        valued,
    }
}

fn attr(
    key: &'static str,
    scope: AttrScope,
    kind: AttrKind,
    default: Option<StaticValue>,
) -> AttributeSpec {
    AttributeSpec {
        key,
        scope,
        kind,
        default,
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    nodes: Vec<NodeSpec>,
    marks: Vec<MarkSpec>,
    attributes: Vec<AttributeSpec>,
}

impl Schema {
    /// The registry used by every replica.
    pub fn standard() -> Result<Self, SchemaError> {
        use Command::*;

        let nodes = vec![
            node(NodeType::Paragraph, "p", None, TEXTBLOCK_COMMANDS),
            heading(1, "h1"),
            heading(2, "h2"),
            heading(3, "h3"),
            heading(4, "h4"),
            heading(5, "h5"),
            node(NodeType::BulletList, "ul", None, &[ToggleList]),
            node(NodeType::OrderedList, "ol", None, &[ToggleList, SetAttribute]),
            node(NodeType::TaskList, "ul", Some("taskList"), &[ToggleList]),
            node(NodeType::ListItem, "li", None, &[]),
            node(NodeType::TaskItem, "li", Some("taskItem"), &[SetAttribute]),
            node(NodeType::Table, "table", None, &[InsertTable]),
            node(NodeType::TableRow, "tr", None, &[]),
            node(NodeType::TableCell, "td", None, &[SetAttribute]),
            node(NodeType::TableHeader, "th", None, &[SetAttribute]),
            node(NodeType::Image, "img", None, &[InsertImage, SetAttribute]),
            node(NodeType::Blockquote, "blockquote", None, &[Wrap]),
            node(NodeType::HorizontalRule, "hr", None, &[]),
            node(NodeType::HardBreak, "br", None, &[]),
        ];

        let marks = vec![
            mark(MarkType::Bold, "strong", &["b"], None, false),
            mark(MarkType::Italic, "em", &["i"], None, false),
            mark(MarkType::Underline, "u", &[], None, false),
            mark(MarkType::Strike, "s", &["del", "strike"], None, false),
            mark(MarkType::Code, "code", &[], None, false),
            mark(MarkType::Color, "span", &[], Some("color"), true),
            mark(MarkType::Highlight, "mark", &[], Some("background-color"), true),
            mark(MarkType::FontFamily, "span", &[], Some("font-family"), true),
            mark(MarkType::FontSize, "span", &[], Some("font-size"), true),
            mark(MarkType::Link, "a", &[], None, true),
        ];

        let cells: &'static [&'static str] = &["table_cell", "table_header"];
        let attributes = vec![
            attr(
                "textAlign",
                AttrScope::TextBlocks,
                AttrKind::OneOf(&TEXT_ALIGNMENTS),
                Some(StaticValue::Text("left")),
            ),
            attr(
                "lineHeight",
                AttrScope::TextBlocks,
                AttrKind::OneOf(&LINE_HEIGHTS),
                Some(StaticValue::Text("normal")),
            ),
            attr("src", AttrScope::Nodes(&["image"]), AttrKind::Text, None),
            attr("alt", AttrScope::Nodes(&["image"]), AttrKind::Text, None),
            attr("title", AttrScope::Nodes(&["image"]), AttrKind::Text, None),
            attr(
                "width",
                AttrScope::Nodes(&["image"]),
                AttrKind::IntRange { min: 1, max: PAGE_WIDTH },
                None,
            ),
            attr("checked", AttrScope::Nodes(&["task_item"]), AttrKind::Bool, Some(StaticValue::Bool(false))),
            attr(
                "start",
                AttrScope::Nodes(&["ordered_list"]),
                AttrKind::IntRange { min: 1, max: i64::MAX },
                Some(StaticValue::Int(1)),
            ),
            attr(
                "colspan",
                AttrScope::Nodes(cells),
                AttrKind::IntRange { min: 1, max: 1_000 },
                Some(StaticValue::Int(1)),
            ),
            attr(
                "rowspan",
                AttrScope::Nodes(cells),
                AttrKind::IntRange { min: 1, max: 1_000 },
                Some(StaticValue::Int(1)),
            ),
            attr(
                LEFT_MARGIN,
                AttrScope::Root,
                AttrKind::IntRange { min: 0, max: PAGE_WIDTH },
                Some(StaticValue::Int(DEFAULT_MARGIN)),
            ),
            attr(
                RIGHT_MARGIN,
                AttrScope::Root,
                AttrKind::IntRange { min: 0, max: PAGE_WIDTH },
                Some(StaticValue::Int(DEFAULT_MARGIN)),
            ),
        ];

        let schema = Schema {
            nodes,
            marks,
            attributes,
        };
        schema.validate()?;
        Ok(schema)
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let mut tags = HashSet::new();
        for spec in &self.nodes {
            if !tags.insert((spec.tag, spec.data_type)) {
                return Err(SchemaError::Duplicate(spec.tag.to_string()));
            }
        }
        for node_type in NodeType::ALL {
            match self.nodes.iter().filter(|s| s.node_type == node_type).count() {
                1 => {}
                0 => return Err(SchemaError::Missing(node_type.to_string())),
                _ => return Err(SchemaError::Duplicate(node_type.to_string())),
            }
        }
        for mark in MarkType::ALL {
            match self.marks.iter().filter(|s| s.mark == mark).count() {
                1 => {}
                0 => return Err(SchemaError::Missing(mark.name().to_string())),
                _ => return Err(SchemaError::Duplicate(mark.name().to_string())),
            }
        }
        let mut keys = HashSet::new();
        for spec in &self.attributes {
            if !keys.insert(spec.key) {
                return Err(SchemaError::Duplicate(spec.key.to_string()));
            }
        }
        Ok(())
    }

    pub fn node_spec(&self, node_type: &NodeType) -> Option<&NodeSpec> {
        self.nodes.iter().find(|s| &s.node_type == node_type)
    }

    pub fn mark_spec(&self, mark: MarkType) -> Option<&MarkSpec> {
        self.marks.iter().find(|s| s.mark == mark)
    }

    pub fn attribute_spec(&self, key: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|s| s.key == key)
    }

    // ── parse ────────────────────────────────────────────────────────────

    /// Node type for an element, by tag and optional `data-type`.
    pub fn parse_node(&self, tag: &str, data_type: Option<&str>) -> Option<NodeType> {
        let exact = self
            .nodes
            .iter()
            .find(|s| s.tag == tag && s.data_type == data_type);
        exact
            .or_else(|| self.nodes.iter().find(|s| s.tag == tag && s.data_type.is_none()))
            .map(|s| s.node_type)
    }

    /// Mark for a tag with a fixed meaning (`<strong>`, `<a>`, `<mark>` ...).
    pub fn parse_mark_tag(&self, tag: &str) -> Option<MarkType> {
        self.marks
            .iter()
            .filter(|s| s.tag != "span")
            .find(|s| s.tag == tag || s.aliases.contains(&tag))
            .map(|s| s.mark)
    }

    /// Mark carried by an inline CSS property.
    pub fn parse_mark_style(&self, property: &str) -> Option<MarkType> {
        self.marks
            .iter()
            .find(|s| s.tag == "span" && s.style == Some(property))
            .map(|s| s.mark)
    }

    // ── render ───────────────────────────────────────────────────────────

    pub fn render_node(&self, node_type: &NodeType) -> (&'static str, Option<&'static str>) {
        self.node_spec(node_type)
            .map(|s| (s.tag, s.data_type))
            .unwrap_or(("div", None))
    }

    // ── commands ─────────────────────────────────────────────────────────

    pub fn supports(&self, node_type: &NodeType, command: Command) -> bool {
        self.node_spec(node_type)
            .is_some_and(|s| s.commands.contains(&command))
    }

    pub fn require(&self, node_type: &NodeType, command: Command) -> Result<(), SchemaError> {
        if self.supports(node_type, command) {
            Ok(())
        } else {
            Err(SchemaError::CommandNotSupported {
                node_type: *node_type,
                command: command.name(),
            })
        }
    }

    // ── attributes & marks ───────────────────────────────────────────────

    /// Check an attribute write. `target` is `None` for the document root.
    pub fn check_attribute(
        &self,
        target: Option<&NodeType>,
        key: &str,
        value: &AttrValue,
    ) -> Result<(), SchemaError> {
        let spec = self
            .attribute_spec(key)
            .ok_or_else(|| SchemaError::UnknownAttribute(key.to_string()))?;
        if !spec.scope.covers(target) {
            return Err(SchemaError::AttributeNotAllowed {
                key: key.to_string(),
                target: target.map_or_else(|| "root".to_string(), |t| t.to_string()),
            });
        }
        if !spec.kind.accepts(value) {
            return Err(SchemaError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    pub fn attribute_default(&self, key: &str) -> Option<AttrValue> {
        self.attribute_spec(key)
            .and_then(|s| s.default)
            .map(StaticValue::to_value)
    }

    pub fn check_mark(&self, mark: MarkType, value: &MarkValue) -> Result<(), SchemaError> {
        let spec = self
            .mark_spec(mark)
            .ok_or_else(|| SchemaError::Missing(mark.name().to_string()))?;
        let invalid = |v: &str| SchemaError::InvalidValue {
            key: mark.name().to_string(),
            value: v.to_string(),
        };
        match value {
            MarkValue::Off => Ok(()),
            MarkValue::On if spec.valued => Err(invalid("on")),
            MarkValue::On => Ok(()),
            MarkValue::Value(v) if !spec.valued => Err(invalid(v)),
            MarkValue::Value(v) => match mark {
                MarkType::FontFamily if !FONT_FAMILIES.contains(&v.as_str()) => Err(invalid(v)),
                MarkType::FontSize if parse_px(v).is_none() => Err(invalid(v)),
                _ if v.trim().is_empty() => Err(invalid(v)),
                _ => Ok(()),
            },
        }
    }
}

/// Parse a positive pixel size such as `"16px"`.
pub fn parse_px(value: &str) -> Option<u32> {
    value
        .strip_suffix("px")
        .and_then(|n| n.trim().parse::<u32>().ok())
        .filter(|n| *n > 0)
}

/// Prefix `https://` when the href carries no scheme.
pub fn normalize_href(href: &str) -> String {
    let href = href.trim();
    let has_scheme = href
        .split_once(':')
        .is_some_and(|(scheme, _)| {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        });
    if has_scheme || href.starts_with('/') || href.starts_with('#') {
        href.to_string()
    } else {
        format!("{}://{}", DEFAULT_LINK_PROTOCOL, href)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_schema_validates() {
        let schema = Schema::standard().unwrap();
        for node_type in NodeType::ALL {
            assert!(schema.node_spec(&node_type).is_some(), "{node_type}");
        }
    }

    #[test]
    fn test_parse_capability() {
        let schema = Schema::standard().unwrap();
        assert_eq!(schema.parse_node("h3", None), Some(NodeType::Heading { level: 3 }));
        assert_eq!(schema.parse_node("ul", Some("taskList")), Some(NodeType::TaskList));
        assert_eq!(schema.parse_node("ul", None), Some(NodeType::BulletList));
        assert_eq!(schema.parse_node("ul", Some("other")), Some(NodeType::BulletList));
        assert_eq!(schema.parse_node("h6", None), None);
        assert_eq!(schema.parse_mark_tag("b"), Some(MarkType::Bold));
        assert_eq!(schema.parse_mark_tag("span"), None);
        assert_eq!(schema.parse_mark_style("font-size"), Some(MarkType::FontSize));
    }

    #[test]
    fn test_render_capability() {
        let schema = Schema::standard().unwrap();
        assert_eq!(schema.render_node(&NodeType::TaskItem), ("li", Some("taskItem")));
        assert_eq!(schema.render_node(&NodeType::Heading { level: 2 }), ("h2", None));
    }

    #[test]
    fn test_command_capability() {
        let schema = Schema::standard().unwrap();
        assert!(schema.supports(&NodeType::Paragraph, Command::SetBlockType));
        assert!(schema.require(&NodeType::Image, Command::SetBlockType).is_err());
    }

    #[test]
    fn test_attribute_checks() {
        let schema = Schema::standard().unwrap();
        let para = NodeType::Paragraph;
        assert!(schema.check_attribute(Some(&para), "textAlign", &"center".into()).is_ok());
        assert!(schema.check_attribute(Some(&para), "textAlign", &"middle".into()).is_err());
        assert!(schema.check_attribute(Some(&para), "lineHeight", &"1.15".into()).is_ok());
        assert!(matches!(
            schema.check_attribute(Some(&NodeType::Image), "lineHeight", &"2".into()),
            Err(SchemaError::AttributeNotAllowed { .. })
        ));
        assert!(schema.check_attribute(None, LEFT_MARGIN, &AttrValue::Int(80)).is_ok());
        assert!(matches!(
            schema.check_attribute(None, "bogus", &AttrValue::Int(1)),
            Err(SchemaError::UnknownAttribute(_))
        ));
        assert_eq!(schema.attribute_default("lineHeight"), Some("normal".into()));
        assert_eq!(schema.attribute_default(RIGHT_MARGIN), Some(AttrValue::Int(56)));
    }

    #[test]
    fn test_mark_checks() {
        let schema = Schema::standard().unwrap();
        assert!(schema.check_mark(MarkType::Bold, &MarkValue::On).is_ok());
        assert!(schema.check_mark(MarkType::Bold, &MarkValue::Value("x".into())).is_err());
        assert!(schema.check_mark(MarkType::FontFamily, &MarkValue::Value("Georgia".into())).is_ok());
        assert!(schema.check_mark(MarkType::FontFamily, &MarkValue::Value("Comic Sans".into())).is_err());
        assert!(schema.check_mark(MarkType::FontSize, &MarkValue::Value("18px".into())).is_ok());
        assert!(schema.check_mark(MarkType::FontSize, &MarkValue::Value("0px".into())).is_err());
        assert!(schema.check_mark(MarkType::Color, &MarkValue::On).is_err());
        assert!(schema.check_mark(MarkType::Color, &MarkValue::Off).is_ok());
    }

    #[test]
    fn test_normalize_href() {
        assert_eq!(normalize_href("example.com"), "https://example.com");
        assert_eq!(normalize_href("http://example.com"), "http://example.com");
        assert_eq!(normalize_href("mailto:a@b.c"), "mailto:a@b.c");
        assert_eq!(normalize_href("/docs"), "/docs");
    }

    #[test]
    fn test_heading_font_sizes() {
        assert_eq!(heading_font_size(1), "32px");
        assert_eq!(heading_font_size(5), "16px");
    }
}
