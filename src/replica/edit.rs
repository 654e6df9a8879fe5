//! Local editing intents.
//!
//! Every intent validates against the current projection and the schema,
//! then emits one or more operations and records one undo group. Intents
//! address content by visible offset; the operations they emit carry only
//! relational positions.

use super::Replica;
use crate::crdt::{AttrValue, MarkType, MarkValue, NodeType, OpKind, ParentRef, UnitId};
use crate::document::schema::{normalize_href, Command, LEFT_MARGIN, MIN_CONTENT_WIDTH, PAGE_WIDTH, RIGHT_MARGIN};
use crate::document::{Fragment, Position, TextRange};
use crate::error::{Result, SchemaError, SyncError};
use crate::undo::{Change, RestoreItem};
use std::collections::BTreeMap;
use unicode_segmentation::UnicodeSegmentation;

/// A visible child picked by a range.
#[derive(Debug, Clone)]
struct Selected {
    unit: UnitId,
    /// Sequence the unit lives in
    parent: ParentRef,
    /// Unit of the container's own sequence the child sits at
    slot: UnitId,
    node_type: Option<NodeType>,
}

impl Replica {
    // ── validation helpers ───────────────────────────────────────────────

    fn require_container(&self, parent: &ParentRef) -> Result<Option<NodeType>> {
        if !self.engine.is_live_container(parent) {
            return Err(SyncError::NotAContainer(parent.to_string()));
        }
        let node_type = parent.node().and_then(|id| self.engine.node_type(id));
        if node_type.is_some_and(|t| t.is_atom()) {
            return Err(SyncError::NotAContainer(parent.to_string()));
        }
        Ok(node_type)
    }

    /// Check that `node_type` may be placed directly in `parent`.
    fn require_placement(&self, parent: &ParentRef, node_type: &NodeType) -> Result<()> {
        let container = self.require_container(parent)?;
        if self.schema.node_spec(node_type).is_none() {
            return Err(SchemaError::Missing(node_type.to_string()).into());
        }
        match container {
            Some(t) if t.is_textblock() && !node_type.is_inline() => Err(SyncError::InvalidIntent(format!(
                "{} cannot be placed inside {}",
                node_type, t
            ))),
            _ => Ok(()),
        }
    }

    /// Sequence and origins for new content at a visible offset. `content`
    /// is the node type to insert, `None` for text.
    ///
    /// Content lifted out of a deleted node still lives in that node's
    /// sequence. Inserting right after a lifted unit anchors on it there,
    /// as long as that sequence may hold the new content; otherwise the
    /// insert goes after the whole deleted node.
    fn origins(
        &self,
        position: &Position,
        content: Option<&NodeType>,
    ) -> Result<(ParentRef, Option<UnitId>, Option<UnitId>)> {
        let items = self.engine.children(&position.parent);
        if position.offset > items.len() {
            return Err(SyncError::PositionOutOfBounds {
                offset: position.offset,
                len: items.len(),
            });
        }
        let Some(before) = position.offset.checked_sub(1).map(|i| &items[i]) else {
            let right = self.next_after(&position.parent, None);
            return Ok((position.parent.clone(), None, right));
        };
        let lifted = before.unit.parent != position.parent;
        let (parent, left) = if lifted && self.accepts(&before.unit.parent, content) {
            (before.unit.parent.clone(), before.unit.id.clone())
        } else {
            (position.parent.clone(), before.slot.clone())
        };
        let right = self.next_after(&parent, Some(&left));
        Ok((parent, Some(left), right))
    }

    /// Whether `container` may directly hold `content` (`None` for text).
    fn accepts(&self, container: &ParentRef, content: Option<&NodeType>) -> bool {
        let Some(container) = container.node().and_then(|id| self.engine.node_type(id)) else {
            return true;
        };
        match content {
            None => self.schema.supports(&container, Command::InsertText),
            Some(node_type) => !container.is_atom() && (!container.is_textblock() || node_type.is_inline()),
        }
    }

    fn select(&self, range: &TextRange) -> Result<Vec<Selected>> {
        let items = self.engine.children(&range.parent);
        if range.start > range.end || range.end > items.len() {
            return Err(SyncError::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                len: items.len(),
            });
        }
        Ok(items[range.start..range.end]
            .iter()
            .map(|item| Selected {
                unit: item.unit.id.clone(),
                parent: item.unit.parent.clone(),
                slot: item.slot.clone(),
                node_type: item.unit.as_node().map(|n| *n.node_type.get()),
            })
            .collect())
    }

    /// Select whole blocks: every selected child must be a node that
    /// accepts `command`.
    fn select_blocks(&self, range: &TextRange, command: Command) -> Result<Vec<Selected>> {
        self.require_container(&range.parent)?;
        let selected = self.select(range)?;
        if selected.is_empty() {
            return Err(SyncError::InvalidIntent("empty block range".into()));
        }
        for block in &selected {
            match &block.node_type {
                Some(t) => self.schema.require(t, command)?,
                None => {
                    return Err(SyncError::InvalidIntent(format!(
                        "{} applies to blocks, not text",
                        command.name()
                    )))
                }
            }
        }
        Ok(selected)
    }

    fn live_node(&self, id: &UnitId) -> Result<NodeType> {
        match self.engine.unit(id) {
            Some(unit) if !unit.is_deleted() => unit
                .as_node()
                .map(|n| *n.node_type.get())
                .ok_or_else(|| SyncError::InvalidIntent(format!("{} is not a node", id))),
            _ => Err(SyncError::UnknownUnit(id.clone())),
        }
    }

    // ── building blocks ──────────────────────────────────────────────────

    /// Tombstone the selected children of `container` along with everything
    /// visible beneath them. Returns the undo record.
    fn remove(&mut self, container: &ParentRef, selected: &[Selected]) -> Option<Change> {
        let mut targets = Vec::new();
        let mut items = Vec::new();
        for s in selected {
            let mut sources = Vec::new();
            let Some(fragment) = self.capture(&s.unit, &|_: &UnitId| true, &mut sources) else {
                continue;
            };
            if s.node_type.is_some() {
                targets.extend(self.engine.subtree(&s.unit));
            } else {
                targets.push(s.unit.clone());
            }
            let after = if &s.parent == container {
                s.unit.clone()
            } else {
                s.slot.clone()
            };
            items.push(RestoreItem {
                parent: container.clone(),
                after,
                fragment,
                sources,
            });
        }
        if targets.is_empty() {
            return None;
        }
        self.commit(OpKind::Delete { targets });
        Some(Change::Deleted { items })
    }

    fn place(&mut self, parent: &ParentRef, left: Option<UnitId>, fragments: &[Fragment]) -> (Vec<UnitId>, Change) {
        let units = self.insert_fragments(parent, left, fragments);
        (units.clone(), Change::Inserted { units })
    }

    // ── text & structure ─────────────────────────────────────────────────

    /// Insert a run of text at a visible offset.
    pub fn insert_text(&mut self, position: &Position, text: &str) -> Result<()> {
        if let Some(t) = self.require_container(&position.parent)? {
            self.schema.require(&t, Command::InsertText)?;
        }
        let (parent, left, right) = self.origins(position, None)?;
        if text.is_empty() {
            return Err(SyncError::InvalidIntent("empty text".into()));
        }
        let op = self.commit(OpKind::InsertText {
            parent,
            left,
            right,
            text: text.to_string(),
        });
        let count = text.graphemes(true).count() as u32;
        let units = (0..count).map(|i| op.id.unit(i)).collect();
        self.record(vec![Change::Inserted { units }]);
        Ok(())
    }

    /// Delete the visible children in `range`. Nodes go with their content.
    pub fn delete_range(&mut self, range: &TextRange) -> Result<()> {
        self.require_container(&range.parent)?;
        let selected = self.select(range)?;
        if selected.is_empty() {
            return Err(SyncError::InvalidIntent("empty range".into()));
        }
        if let Some(change) = self.remove(&range.parent, &selected) {
            self.record(vec![change]);
        }
        Ok(())
    }

    /// Delete one node and everything visible inside it.
    pub fn delete_node(&mut self, id: &UnitId) -> Result<()> {
        let node_type = self.live_node(id)?;
        let parent = self
            .engine
            .unit(id)
            .map(|u| u.parent.clone())
            .ok_or_else(|| SyncError::UnknownUnit(id.clone()))?;
        let selected = Selected {
            unit: id.clone(),
            parent: parent.clone(),
            slot: id.clone(),
            node_type: Some(node_type),
        };
        if let Some(change) = self.remove(&parent, &[selected]) {
            self.record(vec![change]);
        }
        Ok(())
    }

    /// Insert an empty node. Returns its ID.
    pub fn insert_node(
        &mut self,
        position: &Position,
        node_type: NodeType,
        attrs: BTreeMap<String, AttrValue>,
    ) -> Result<UnitId> {
        self.require_placement(&position.parent, &node_type)?;
        for (key, value) in &attrs {
            self.schema.check_attribute(Some(&node_type), key, value)?;
        }
        let (parent, left, right) = self.origins(position, Some(&node_type))?;
        let op = self.commit(OpKind::InsertNode {
            parent,
            left,
            right,
            node_type,
            attrs,
        });
        let id = op.id.unit(0);
        self.record(vec![Change::Inserted { units: vec![id.clone()] }]);
        Ok(id)
    }

    /// Insert an empty paragraph.
    pub fn insert_paragraph(&mut self, position: &Position) -> Result<UnitId> {
        self.insert_node(position, NodeType::Paragraph, BTreeMap::new())
    }

    /// Convert a text block between paragraph and heading levels. Setting
    /// the current type still writes it, so it wins over concurrent
    /// conversions ordered before it.
    pub fn set_block_type(&mut self, id: &UnitId, node_type: NodeType) -> Result<()> {
        let current = self.live_node(id)?;
        self.schema.require(&current, Command::SetBlockType)?;
        if !node_type.is_textblock() || self.schema.node_spec(&node_type).is_none() {
            return Err(SyncError::InvalidIntent(format!("cannot convert a block to {}", node_type)));
        }
        let op = self.commit(OpKind::SetNodeType {
            target: id.clone(),
            node_type,
        });
        self.record(vec![Change::Retyped {
            target: id.clone(),
            previous: current,
            applied: op.id,
        }]);
        Ok(())
    }

    /// Wrap the blocks of `range` in a list, or unwrap them when `range`
    /// lies inside a list item of the same kind. Inside a list of another
    /// kind the list is converted.
    pub fn toggle_list(&mut self, range: &TextRange, list: NodeType) -> Result<()> {
        if !list.is_list() {
            return Err(SyncError::InvalidIntent(format!("{} is not a list type", list)));
        }
        self.schema.require(&list, Command::ToggleList)?;

        if let Some(list_id) = self.enclosing_list(&range.parent) {
            let current = self.live_node(&list_id)?;
            return if current == list {
                self.lift_children(&list_id)
            } else {
                self.convert_list(&list_id, current, list)
            };
        }

        let selected = self.select_blocks(range, Command::ToggleList)?;
        let item_type = if list == NodeType::TaskList {
            NodeType::TaskItem
        } else {
            NodeType::ListItem
        };
        let items = selected
            .iter()
            .filter_map(|block| self.fragment_of(&block.unit))
            .map(|block| Fragment::node(item_type, vec![block]))
            .collect();
        let left = self.slot_before(&range.parent, range.start);
        let (_, inserted) = self.place(&range.parent, left, &[Fragment::node(list, items)]);
        let mut changes = vec![inserted];
        changes.extend(self.remove(&range.parent, &selected));
        self.record(changes);
        Ok(())
    }

    /// The list whose item directly contains `parent`, if any.
    fn enclosing_list(&self, parent: &ParentRef) -> Option<UnitId> {
        let item = self.engine.unit(parent.node()?)?;
        let item_type = *item.as_node()?.node_type.get();
        if !matches!(item_type, NodeType::ListItem | NodeType::TaskItem) {
            return None;
        }
        let list = item.parent.node()?;
        self.engine.node_type(list).filter(NodeType::is_list).map(|_| list.clone())
    }

    fn convert_list(&mut self, list_id: &UnitId, current: NodeType, list: NodeType) -> Result<()> {
        let mut changes = Vec::new();
        let op = self.commit(OpKind::SetNodeType {
            target: list_id.clone(),
            node_type: list,
        });
        changes.push(Change::Retyped {
            target: list_id.clone(),
            previous: current,
            applied: op.id,
        });

        let item_type = if list == NodeType::TaskList {
            NodeType::TaskItem
        } else {
            NodeType::ListItem
        };
        for item in self.child_ids(&ParentRef::Node(list_id.clone())) {
            let Some(previous) = self.engine.node_type(&item) else {
                continue;
            };
            if previous == item_type || !matches!(previous, NodeType::ListItem | NodeType::TaskItem) {
                continue;
            }
            let op = self.commit(OpKind::SetNodeType {
                target: item.clone(),
                node_type: item_type,
            });
            changes.push(Change::Retyped {
                target: item,
                previous,
                applied: op.id,
            });
        }
        self.record(changes);
        Ok(())
    }

    /// Wrap the blocks of `range` in a container node such as a blockquote.
    pub fn wrap_range(&mut self, range: &TextRange, wrapper: NodeType) -> Result<UnitId> {
        self.require_placement(&range.parent, &wrapper)?;
        self.schema.require(&wrapper, Command::Wrap)?;
        let selected = self.select(range)?;
        if selected.is_empty() || selected.iter().any(|s| s.node_type.map_or(true, |t| t.is_inline())) {
            return Err(SyncError::InvalidIntent("wrap applies to a range of blocks".into()));
        }

        let blocks = selected
            .iter()
            .filter_map(|block| self.fragment_of(&block.unit))
            .collect();
        let left = self.slot_before(&range.parent, range.start);
        let (units, inserted) = self.place(&range.parent, left, &[Fragment::node(wrapper, blocks)]);
        let mut changes = vec![inserted];
        changes.extend(self.remove(&range.parent, &selected));
        self.record(changes);
        units
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::InvalidIntent("wrap produced no node".into()))
    }

    /// Replace a wrapper node (blockquote, list) by its children.
    pub fn unwrap(&mut self, id: &UnitId) -> Result<()> {
        let node_type = self.live_node(id)?;
        if !self.schema.supports(&node_type, Command::Wrap) && !node_type.is_list() {
            return Err(SchemaError::CommandNotSupported {
                node_type,
                command: Command::Wrap.name(),
            }
            .into());
        }
        self.lift_children(id)
    }

    /// Move the content of `id` in front of it and delete it. List items
    /// are dissolved too, so a list unwraps to its blocks.
    fn lift_children(&mut self, id: &UnitId) -> Result<()> {
        let node_type = self.live_node(id)?;
        let parent = self
            .engine
            .unit(id)
            .map(|u| u.parent.clone())
            .ok_or_else(|| SyncError::UnknownUnit(id.clone()))?;

        let mut content = Vec::new();
        for child in self.child_ids(&ParentRef::Node(id.clone())) {
            let is_item = matches!(
                self.engine.node_type(&child),
                Some(NodeType::ListItem | NodeType::TaskItem)
            );
            if node_type.is_list() && is_item {
                content.extend(
                    self.child_ids(&ParentRef::Node(child))
                        .iter()
                        .filter_map(|grandchild| self.fragment_of(grandchild)),
                );
            } else {
                content.extend(self.fragment_of(&child));
            }
        }

        let (_, inserted) = self.place(&parent, Some(id.clone()), &content);
        let selected = Selected {
            unit: id.clone(),
            parent: parent.clone(),
            slot: id.clone(),
            node_type: Some(node_type),
        };
        let mut changes = vec![inserted];
        changes.extend(self.remove(&parent, &[selected]));
        self.record(changes);
        Ok(())
    }

    fn slot_before(&self, parent: &ParentRef, offset: usize) -> Option<UnitId> {
        let items = self.engine.children(parent);
        offset
            .checked_sub(1)
            .and_then(|i| items.get(i))
            .map(|item| item.slot.clone())
    }

    /// Insert a `rows` × `cols` table of empty cells. Returns the table ID.
    pub fn insert_table(&mut self, position: &Position, rows: usize, cols: usize, header_row: bool) -> Result<UnitId> {
        if rows == 0 || cols == 0 {
            return Err(SyncError::InvalidIntent(format!("invalid table size {}x{}", rows, cols)));
        }
        self.schema.require(&NodeType::Table, Command::InsertTable)?;
        self.require_placement(&position.parent, &NodeType::Table)?;
        let (parent, left, _) = self.origins(position, Some(&NodeType::Table))?;

        let table_rows = (0..rows)
            .map(|r| {
                let cell_type = if header_row && r == 0 {
                    NodeType::TableHeader
                } else {
                    NodeType::TableCell
                };
                let cells = (0..cols)
                    .map(|_| Fragment::node(cell_type, vec![Fragment::node(NodeType::Paragraph, vec![])]))
                    .collect();
                Fragment::node(NodeType::TableRow, cells)
            })
            .collect();
        let (units, inserted) = self.place(
            &parent,
            left,
            &[Fragment::node(NodeType::Table, table_rows)],
        );
        self.record(vec![inserted]);
        units
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::InvalidIntent("table produced no node".into()))
    }

    pub fn insert_image(&mut self, position: &Position, src: &str, alt: Option<&str>) -> Result<UnitId> {
        self.schema.require(&NodeType::Image, Command::InsertImage)?;
        let mut attrs = BTreeMap::from([("src".to_string(), AttrValue::from(src))]);
        if let Some(alt) = alt {
            attrs.insert("alt".to_string(), AttrValue::from(alt));
        }
        self.insert_node(position, NodeType::Image, attrs)
    }

    // ── marks ────────────────────────────────────────────────────────────

    /// Characters of `range`, grouped into runs sharing one sequence.
    fn mark_runs(&self, range: &TextRange) -> Result<Vec<(ParentRef, Vec<UnitId>)>> {
        self.require_container(&range.parent)?;
        let mut runs: Vec<(ParentRef, Vec<UnitId>)> = Vec::new();
        for s in self.select(range)? {
            if s.node_type.is_some() {
                continue;
            }
            match runs.last_mut() {
                Some((parent, units)) if *parent == s.parent => units.push(s.unit),
                _ => runs.push((s.parent, vec![s.unit])),
            }
        }
        Ok(runs)
    }

    pub fn set_mark(&mut self, range: &TextRange, mark: MarkType, value: MarkValue) -> Result<()> {
        self.schema.check_mark(mark, &value)?;
        let runs = self.mark_runs(range)?;
        if runs.is_empty() {
            return Err(SyncError::InvalidIntent(format!("no text to mark {}", mark.name())));
        }
        let mut changes = Vec::new();
        for (parent, units) in runs {
            let (Some(start), Some(end)) = (units.first().cloned(), units.last().cloned()) else {
                continue;
            };
            let previous = units
                .into_iter()
                .map(|unit| {
                    let value = self
                        .engine
                        .mark_winner(&unit, mark)
                        .map_or(MarkValue::Off, |span| span.value.clone());
                    (unit, value)
                })
                .collect();
            let op = self.commit(OpKind::SetMark {
                parent,
                start,
                end,
                mark,
                value: value.clone(),
            });
            changes.push(Change::MarkSet {
                mark,
                previous,
                applied: op.id,
            });
        }
        self.record(changes);
        Ok(())
    }

    pub fn unset_mark(&mut self, range: &TextRange, mark: MarkType) -> Result<()> {
        self.set_mark(range, mark, MarkValue::Off)
    }

    /// Turn a flag mark on across `range`, or off if every character
    /// already has it.
    pub fn toggle_mark(&mut self, range: &TextRange, mark: MarkType) -> Result<()> {
        if self.schema.mark_spec(mark).is_some_and(|spec| spec.valued) {
            return Err(SyncError::InvalidIntent(format!("{} needs a value", mark.name())));
        }
        let runs = self.mark_runs(range)?;
        let all_on = runs
            .iter()
            .flat_map(|(_, units)| units)
            .all(|unit| self.engine.marks_of(unit).contains_key(&mark));
        let value = if all_on && !runs.is_empty() {
            MarkValue::Off
        } else {
            MarkValue::On
        };
        self.set_mark(range, mark, value)
    }

    /// Link `range` to `href`, adding `https://` when it has no scheme.
    pub fn set_link(&mut self, range: &TextRange, href: &str) -> Result<()> {
        if href.trim().is_empty() {
            return Err(SyncError::InvalidIntent("empty link target".into()));
        }
        self.set_mark(range, MarkType::Link, MarkValue::Value(normalize_href(href)))
    }

    pub fn unset_link(&mut self, range: &TextRange) -> Result<()> {
        self.unset_mark(range, MarkType::Link)
    }

    // ── attributes ───────────────────────────────────────────────────────

    /// Set an attribute. Writing the current value still emits an
    /// operation, so it wins over concurrent writes ordered before it.
    pub fn set_attribute(&mut self, target: &ParentRef, key: &str, value: AttrValue) -> Result<()> {
        let node_type = self.attribute_target(target)?;
        self.schema.check_attribute(node_type.as_ref(), key, &value)?;
        let change = self.write_attribute(target, key, Some(value));
        self.record(vec![change]);
        Ok(())
    }

    /// Reset an attribute to its default.
    pub fn unset_attribute(&mut self, target: &ParentRef, key: &str) -> Result<()> {
        self.attribute_target(target)?;
        if self.schema.attribute_spec(key).is_none() {
            return Err(SchemaError::UnknownAttribute(key.to_string()).into());
        }
        let change = self.write_attribute(target, key, None);
        self.record(vec![change]);
        Ok(())
    }

    /// Set both page margins, in pixels, as one undo step.
    pub fn set_margins(&mut self, left: i64, right: i64) -> Result<()> {
        if !(0..=PAGE_WIDTH).contains(&left)
            || !(0..=PAGE_WIDTH).contains(&right)
            || PAGE_WIDTH - left - right < MIN_CONTENT_WIDTH
        {
            return Err(SyncError::InvalidIntent(format!(
                "margins {} and {} leave less than {}px of content",
                left, right, MIN_CONTENT_WIDTH
            )));
        }
        let mut changes = Vec::new();
        for (key, value) in [(LEFT_MARGIN, left), (RIGHT_MARGIN, right)] {
            self.schema.check_attribute(None, key, &AttrValue::Int(value))?;
            changes.push(self.write_attribute(&ParentRef::Root, key, Some(AttrValue::Int(value))));
        }
        self.record(changes);
        Ok(())
    }

    fn attribute_target(&self, target: &ParentRef) -> Result<Option<NodeType>> {
        match target {
            ParentRef::Root => Ok(None),
            ParentRef::Node(id) => {
                let node_type = self.live_node(id)?;
                self.schema.require(&node_type, Command::SetAttribute)?;
                Ok(Some(node_type))
            }
        }
    }

    fn write_attribute(&mut self, target: &ParentRef, key: &str, value: Option<AttrValue>) -> Change {
        let previous = self.engine.attribute(target, key).cloned();
        let op = self.commit(OpKind::SetAttribute {
            target: target.clone(),
            key: key.to_string(),
            value,
        });
        Change::AttributeSet {
            target: target.clone(),
            key: key.to_string(),
            previous,
            applied: op.id,
        }
    }
}
