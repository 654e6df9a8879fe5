//! Markup rendering of a snapshot through the schema's render capability.

use super::schema::Schema;
use super::{Content, DocumentSnapshot, NodeView, TextRun};
use crate::crdt::MarkValue;
use std::fmt::Write;

/// Render a snapshot as HTML, the inverse of seed parsing.
pub fn render_html(schema: &Schema, snapshot: &DocumentSnapshot) -> String {
    let mut out = String::new();
    render_content(schema, &snapshot.content, &mut out);
    out
}

fn render_content(schema: &Schema, content: &[Content], out: &mut String) {
    for item in content {
        match item {
            Content::Text(run) => render_run(schema, run, out),
            Content::Node(node) => render_node(schema, node, out),
        }
    }
}

fn render_node(schema: &Schema, node: &NodeView, out: &mut String) {
    let (tag, data_type) = schema.render_node(&node.node_type);
    out.push('<');
    out.push_str(tag);
    if let Some(data_type) = data_type {
        let _ = write!(out, r#" data-type="{}""#, data_type);
    }

    let mut style = String::new();
    for (key, value) in &node.attrs {
        match key.as_str() {
            "textAlign" => {
                let _ = write!(style, "text-align: {}; ", value);
            }
            "lineHeight" => {
                let _ = write!(style, "line-height: {}; ", value);
            }
            "checked" => {
                if value.as_bool() == Some(true) {
                    out.push_str(r#" data-checked="true""#);
                }
            }
            _ => {
                let _ = write!(out, r#" {}="{}""#, key, escape(&value.to_string()));
            }
        }
    }
    if !style.is_empty() {
        let _ = write!(out, r#" style="{}""#, style.trim_end());
    }
    out.push('>');

    if node.node_type.is_atom() {
        return;
    }
    render_content(schema, &node.content, out);
    let _ = write!(out, "</{}>", tag);
}

fn render_run(schema: &Schema, run: &TextRun, out: &mut String) {
    let mut closing = Vec::new();
    for (mark, value) in &run.marks {
        let Some(spec) = schema.mark_spec(*mark) else {
            continue;
        };
        let value = match value {
            MarkValue::Off => continue,
            MarkValue::On => None,
            MarkValue::Value(v) => Some(escape(v)),
        };
        out.push('<');
        out.push_str(spec.tag);
        match (spec.tag, spec.style, &value) {
            ("a", _, Some(href)) => {
                let _ = write!(out, r#" href="{}""#, href);
            }
            (_, Some(property), Some(v)) => {
                let _ = write!(out, r#" style="{}: {}""#, property, v);
            }
            _ => {}
        }
        out.push('>');
        closing.push(spec.tag);
    }
    out.push_str(&escape(&run.text));
    for tag in closing.iter().rev() {
        let _ = write!(out, "</{}>", tag);
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
    out
}
