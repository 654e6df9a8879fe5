//! Initial content parsing.
//!
//! Seed content arrives once, when a document is created, as a small HTML
//! subset. It is parsed into [`Fragment`]s through the schema's parse
//! capability and then appended to the log as ordinary insert operations.
//!
//! Unknown elements are transparent: their children are kept and the tag is
//! dropped. Inline content that ends up directly inside a block container is
//! wrapped in a paragraph. Mismatched or unclosed tags are an error, so a
//! damaged blob is never half-imported.

use super::schema::{normalize_href, Schema};
use super::Fragment;
use crate::crdt::{AttrValue, MarkType, MarkValue, NodeType};
use crate::error::SeedError;
use std::collections::BTreeMap;

const VOID_ELEMENTS: [&str; 8] = ["br", "hr", "img", "input", "meta", "link", "wbr", "col"];

/// Default highlight colour for `<mark>` without an explicit one.
const DEFAULT_HIGHLIGHT: &str = "#ffff00";

#[derive(Debug)]
enum Markup {
    Text(String),
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<Markup>,
    },
}

impl Markup {
    fn attr(&self, name: &str) -> Option<&str> {
        match self {
            Markup::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            Markup::Text(_) => None,
        }
    }
}

/// Parse seed markup into document fragments.
pub fn parse_markup(schema: &Schema, markup: &str) -> Result<Vec<Fragment>, SeedError> {
    let tree = Parser::new(markup).parse()?;
    let mut out = Vec::new();
    convert(schema, &tree, &BTreeMap::new(), &mut out);
    Ok(normalize_block(out))
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

struct Open {
    tag: String,
    attrs: Vec<(String, String)>,
    start: usize,
    children: Vec<Markup>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn error(&self, position: usize, reason: impl Into<String>) -> SeedError {
        SeedError {
            position,
            reason: reason.into(),
        }
    }

    fn parse(mut self) -> Result<Vec<Markup>, SeedError> {
        let mut root: Vec<Markup> = Vec::new();
        let mut stack: Vec<Open> = Vec::new();

        while self.pos < self.src.len() {
            let rest = &self.src[self.pos..];
            let Some(lt) = rest.find('<') else {
                push_child(&mut stack, &mut root, Markup::Text(decode_entities(rest)));
                self.pos = self.src.len();
                break;
            };
            if lt > 0 {
                push_child(&mut stack, &mut root, Markup::Text(decode_entities(&rest[..lt])));
                self.pos += lt;
                continue;
            }

            let start = self.pos;
            if rest.starts_with("<!--") {
                let end = rest
                    .find("-->")
                    .ok_or_else(|| self.error(start, "unterminated comment"))?;
                self.pos += end + 3;
                continue;
            }

            let end = tag_end(rest).ok_or_else(|| self.error(start, "unterminated tag"))?;
            let inner = &rest[1..end];
            self.pos += end + 1;

            if inner.starts_with('!') || inner.starts_with('?') {
                continue;
            }
            if let Some(name) = inner.strip_prefix('/') {
                let name = name.trim().to_ascii_lowercase();
                match stack.pop() {
                    Some(open) if open.tag == name => {
                        let element = Markup::Element {
                            tag: open.tag,
                            attrs: open.attrs,
                            children: open.children,
                        };
                        push_child(&mut stack, &mut root, element);
                    }
                    Some(open) => {
                        return Err(self.error(
                            start,
                            format!("</{}> closes <{}> opened at byte {}", name, open.tag, open.start),
                        ))
                    }
                    None => return Err(self.error(start, format!("unexpected </{}>", name))),
                }
                continue;
            }

            let self_closing = inner.ends_with('/');
            let inner = inner.trim_end_matches('/');
            let (tag, attrs) = parse_tag(inner).ok_or_else(|| self.error(start, "malformed tag"))?;
            if self_closing || VOID_ELEMENTS.contains(&tag.as_str()) {
                let element = Markup::Element {
                    tag,
                    attrs,
                    children: Vec::new(),
                };
                push_child(&mut stack, &mut root, element);
            } else {
                stack.push(Open {
                    tag,
                    attrs,
                    start,
                    children: Vec::new(),
                });
            }
        }

        if let Some(open) = stack.pop() {
            return Err(self.error(open.start, format!("unclosed <{}>", open.tag)));
        }
        Ok(root)
    }
}

fn push_child(stack: &mut [Open], root: &mut Vec<Markup>, child: Markup) {
    match stack.last_mut() {
        Some(open) => open.children.push(child),
        None => root.push(child),
    }
}

/// Byte index of the `>` closing the tag at the start of `rest`, skipping
/// quoted attribute values.
fn tag_end(rest: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in rest.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(i),
            (None, '<') => return None,
            _ => {}
        }
    }
    None
}

fn parse_tag(inner: &str) -> Option<(String, Vec<(String, String)>)> {
    let inner = inner.trim();
    let name_end = inner
        .find(|c: char| c.is_whitespace())
        .unwrap_or(inner.len());
    let tag = inner[..name_end].to_ascii_lowercase();
    if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return None;
    }

    let mut attrs = Vec::new();
    let mut rest = inner[name_end..].trim_start();
    while !rest.is_empty() {
        let key_end = rest
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(rest.len());
        let key = rest[..key_end].to_ascii_lowercase();
        rest = rest[key_end..].trim_start();
        let value = if let Some(after) = rest.strip_prefix('=') {
            let after = after.trim_start();
            match after.chars().next() {
                Some(q @ ('"' | '\'')) => {
                    let close = after[1..].find(q)?;
                    rest = &after[close + 2..];
                    decode_entities(&after[1..close + 1])
                }
                _ => {
                    let end = after
                        .find(|c: char| c.is_whitespace())
                        .unwrap_or(after.len());
                    rest = &after[end..];
                    decode_entities(&after[..end])
                }
            }
        } else {
            String::new()
        };
        if !key.is_empty() {
            attrs.push((key, value));
        }
        rest = rest.trim_start();
    }
    Some((tag, attrs))
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &rest[1..end];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" | "#39" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity.strip_prefix('#').and_then(|num| {
                    let hex = num.strip_prefix('x').or_else(|| num.strip_prefix('X'));
                    let code = match hex {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => num.parse::<u32>().ok(),
                    };
                    code.and_then(char::from_u32)
                }),
            };
            c.map(|c| (c, end))
        });
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        // Non-breaking spaces survive collapsing
        if c.is_whitespace() && c != '\u{a0}' {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

fn style_properties(style: &str) -> impl Iterator<Item = (String, String)> + '_ {
    style.split(';').filter_map(|decl| {
        let (prop, value) = decl.split_once(':')?;
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        Some((prop.trim().to_ascii_lowercase(), value.to_string()))
    })
}

fn convert(
    schema: &Schema,
    nodes: &[Markup],
    marks: &BTreeMap<MarkType, MarkValue>,
    out: &mut Vec<Fragment>,
) {
    for markup in nodes {
        let (tag, children) = match markup {
            Markup::Text(text) => {
                let text = collapse_whitespace(text);
                if !text.is_empty() {
                    out.push(Fragment::Text {
                        text,
                        marks: marks.clone(),
                    });
                }
                continue;
            }
            Markup::Element { tag, children, .. } => (tag.as_str(), children),
        };

        if let Some(node_type) = schema.parse_node(tag, markup.attr("data-type")) {
            let attrs = node_attrs(schema, &node_type, markup);
            let mut inner = Vec::new();
            if !node_type.is_atom() {
                convert(schema, children, marks, &mut inner);
            }
            let children = if node_type.is_textblock() {
                trim_inline(inner)
            } else if node_type.is_atom() {
                inner
            } else {
                normalize_block(inner)
            };
            out.push(Fragment::Node {
                node_type,
                attrs,
                children,
            });
            continue;
        }

        let mut nested = marks.clone();
        if let Some(mark) = schema.parse_mark_tag(tag) {
            let value = match mark {
                MarkType::Link => markup
                    .attr("href")
                    .filter(|href| !href.trim().is_empty())
                    .map(|href| MarkValue::Value(normalize_href(href))),
                MarkType::Highlight => Some(MarkValue::Value(
                    markup
                        .attr("data-color")
                        .map(str::to_string)
                        .or_else(|| {
                            markup.attr("style").and_then(|s| {
                                style_properties(s)
                                    .find(|(p, _)| p == "background-color")
                                    .map(|(_, v)| v)
                            })
                        })
                        .unwrap_or_else(|| DEFAULT_HIGHLIGHT.to_string()),
                )),
                _ => Some(MarkValue::On),
            };
            if let Some(value) = value.filter(|v| schema.check_mark(mark, v).is_ok()) {
                nested.insert(mark, value);
            }
        }
        if let Some(style) = markup.attr("style") {
            for (property, value) in style_properties(style) {
                let Some(mark) = schema.parse_mark_style(&property) else {
                    continue;
                };
                let value = MarkValue::Value(value);
                if schema.check_mark(mark, &value).is_ok() {
                    nested.insert(mark, value);
                }
            }
        }
        convert(schema, children, &nested, out);
    }
}

fn node_attrs(schema: &Schema, node_type: &NodeType, markup: &Markup) -> BTreeMap<String, AttrValue> {
    let mut candidates: Vec<(&str, AttrValue)> = Vec::new();
    let int = |name: &str| markup.attr(name).and_then(|v| v.trim().parse::<i64>().ok());

    match node_type {
        NodeType::Image => {
            for key in ["src", "alt", "title"] {
                if let Some(v) = markup.attr(key) {
                    candidates.push((key, AttrValue::from(v)));
                }
            }
            if let Some(width) = int("width") {
                candidates.push(("width", AttrValue::Int(width)));
            }
        }
        NodeType::TaskItem => {
            let checked = markup
                .attr("data-checked")
                .is_some_and(|v| v.is_empty() || v == "true");
            candidates.push(("checked", AttrValue::Bool(checked)));
        }
        NodeType::OrderedList => {
            if let Some(start) = int("start") {
                candidates.push(("start", AttrValue::Int(start)));
            }
        }
        NodeType::TableCell | NodeType::TableHeader => {
            for key in ["colspan", "rowspan"] {
                if let Some(n) = int(key) {
                    candidates.push((key, AttrValue::Int(n)));
                }
            }
        }
        t if t.is_textblock() => {
            if let Some(style) = markup.attr("style") {
                for (property, value) in style_properties(style) {
                    match property.as_str() {
                        "text-align" => candidates.push(("textAlign", AttrValue::Text(value))),
                        "line-height" => candidates.push(("lineHeight", AttrValue::Text(value))),
                        _ => {}
                    }
                }
            }
        }
        _ => {}
    }

    candidates
        .into_iter()
        .filter(|(key, value)| schema.check_attribute(Some(node_type), key, value).is_ok())
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn is_inline(fragment: &Fragment) -> bool {
    match fragment {
        Fragment::Text { .. } => true,
        Fragment::Node { node_type, .. } => node_type.is_inline(),
    }
}

/// Wrap loose inline runs of a block container in paragraphs.
fn normalize_block(children: Vec<Fragment>) -> Vec<Fragment> {
    let mut out = Vec::new();
    let mut run: Vec<Fragment> = Vec::new();
    for child in children {
        if is_inline(&child) {
            run.push(child);
        } else {
            flush_run(&mut run, &mut out);
            out.push(child);
        }
    }
    flush_run(&mut run, &mut out);
    out
}

fn flush_run(run: &mut Vec<Fragment>, out: &mut Vec<Fragment>) {
    let inline = trim_inline(std::mem::take(run));
    if !inline.is_empty() {
        out.push(Fragment::node(NodeType::Paragraph, inline));
    }
}

/// Drop whitespace at the edges of a text block.
fn trim_inline(mut children: Vec<Fragment>) -> Vec<Fragment> {
    if let Some(Fragment::Text { text, .. }) = children.first_mut() {
        *text = text.trim_start_matches(' ').to_string();
    }
    if let Some(Fragment::Text { text, .. }) = children.last_mut() {
        *text = text.trim_end_matches(' ').to_string();
    }
    children.retain(|c| !matches!(c, Fragment::Text { text, .. } if text.is_empty()));
    children
}
