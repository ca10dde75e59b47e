//! Arena-backed [`HostTree`] used by tests, the replay CLI and benchmarks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{AnnotatorError, Result};
use crate::selector::Selector;
use crate::tree::{HostTree, MutationRecord, NodeId};

#[derive(Debug, Clone)]
enum NodeData {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeEntry {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    entry: Option<NodeEntry>,
}

/// In-memory document with a `body` element as its root.
///
/// Detached nodes stay alive until [`MemoryTree::collect_garbage`] frees
/// them, after which their handles go stale.
#[derive(Debug, Clone)]
pub struct MemoryTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    document: NodeId,
    records: Vec<MutationRecord>,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    pub fn new() -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            document: NodeId::new(0, 0),
            records: Vec::new(),
        };
        tree.document = tree.alloc(NodeData::Element {
            tag: "body".to_string(),
            attrs: Vec::new(),
        });
        tree
    }

    /// Build a document whose body holds the given subtrees.
    pub fn from_specs(specs: &[NodeSpec]) -> Result<Self> {
        let mut tree = Self::new();
        let document = tree.document;
        for spec in specs {
            tree.append_spec(document, spec)?;
        }
        tree.records.clear();
        Ok(tree)
    }

    /// Build `spec` detached, then insert it under `parent` as one change.
    pub fn append_spec(&mut self, parent: NodeId, spec: &NodeSpec) -> Result<NodeId> {
        let node = self.build_detached(spec)?;
        self.insert_child(parent, node, None)?;
        Ok(node)
    }

    fn build_detached(&mut self, spec: &NodeSpec) -> Result<NodeId> {
        let node = self.create_element(&spec.tag);
        if let Some(id) = &spec.id {
            self.set_attribute(node, "id", id)?;
        }
        if let Some(class) = &spec.class {
            self.set_attribute(node, "class", class)?;
        }
        for (name, value) in &spec.attrs {
            self.set_attribute(node, name, value)?;
        }
        if let Some(text) = &spec.text {
            let text_node = self.create_text(text);
            self.insert_child(node, text_node, None)?;
        }
        for child in &spec.children {
            let child_node = self.build_detached(child)?;
            self.insert_child(node, child_node, None)?;
        }
        Ok(node)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_child(parent, child, None)
    }

    /// First node in document order matching `selector`.
    pub fn find(&self, selector: &str) -> Result<Option<NodeId>> {
        Ok(Selector::parse(selector)?.query(self, self.document))
    }

    /// Every node in document order matching `selector`.
    pub fn find_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        Ok(Selector::parse(selector)?.query_all(self, self.document))
    }

    pub fn pending_records(&self) -> usize {
        self.records.len()
    }

    pub fn live_nodes(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    /// Free every node not reachable from the document. Returns how many
    /// nodes were freed.
    pub fn collect_garbage(&mut self) -> usize {
        let mut reachable = vec![false; self.slots.len()];
        let mut stack = vec![self.document];
        while let Some(node) = stack.pop() {
            reachable[node.index() as usize] = true;
            if let Some(entry) = self.entry(node) {
                stack.extend(entry.children.iter().copied());
            }
        }

        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.entry.is_some() && !reachable[index] {
                slot.entry = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                freed += 1;
            }
        }
        trace!(freed, "collected detached nodes");
        freed
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let entry = NodeEntry {
            data,
            parent: None,
            children: Vec::new(),
        };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            NodeId::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            NodeId::new(index, 0)
        }
    }

    fn entry(&self, node: NodeId) -> Option<&NodeEntry> {
        self.slots
            .get(node.index() as usize)
            .filter(|slot| slot.generation == node.generation())
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, node: NodeId) -> Result<&mut NodeEntry> {
        self.slots
            .get_mut(node.index() as usize)
            .filter(|slot| slot.generation == node.generation())
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(AnnotatorError::StaleNode(node))
    }

    fn attrs_mut(&mut self, node: NodeId) -> Result<&mut Vec<(String, String)>> {
        match &mut self.entry_mut(node)?.data {
            NodeData::Element { attrs, .. } => Ok(attrs),
            NodeData::Text(_) => Err(AnnotatorError::InvalidOperation(format!(
                "{node} is a text node and has no attributes"
            ))),
        }
    }

    fn record(&mut self, target: NodeId, record: MutationRecord) {
        if self.is_connected(target) {
            self.records.push(record);
        }
    }

    fn unlink(&mut self, node: NodeId) -> Result<Option<NodeId>> {
        let parent = self.entry_mut(node)?.parent.take();
        if let Some(parent) = parent {
            self.entry_mut(parent)?.children.retain(|child| *child != node);
        }
        Ok(parent)
    }
}

impl HostTree for MemoryTree {
    fn document(&self) -> NodeId {
        self.document
    }

    fn contains(&self, node: NodeId) -> bool {
        self.entry(node).is_some()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.entry(node).and_then(|entry| entry.parent)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.entry(node)
            .map(|entry| entry.children.clone())
            .unwrap_or_default()
    }

    fn is_element(&self, node: NodeId) -> bool {
        matches!(
            self.entry(node).map(|entry| &entry.data),
            Some(NodeData::Element { .. })
        )
    }

    fn tag_name(&self, node: NodeId) -> Option<&str> {
        match &self.entry(node)?.data {
            NodeData::Element { tag, .. } => Some(tag.as_str()),
            NodeData::Text(_) => None,
        }
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        match &self.entry(node)?.data {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            NodeData::Text(_) => None,
        }
    }

    fn own_text(&self, node: NodeId) -> Option<&str> {
        match &self.entry(node)?.data {
            NodeData::Text(text) => Some(text.as_str()),
            NodeData::Element { .. } => None,
        }
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<()> {
        let attrs = self.attrs_mut(node)?;
        match attrs.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => attrs.push((name.to_string(), value.to_string())),
        }
        self.record(node, MutationRecord::attribute(node, name));
        Ok(())
    }

    fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<()> {
        let attrs = self.attrs_mut(node)?;
        let before = attrs.len();
        attrs.retain(|(key, _)| key != name);
        if attrs.len() != before {
            self.record(node, MutationRecord::attribute(node, name));
        }
        Ok(())
    }

    fn set_text_content(&mut self, node: NodeId, text: &str) -> Result<()> {
        if let NodeData::Text(data) = &mut self.entry_mut(node)?.data {
            *data = text.to_string();
            self.record(node, MutationRecord::character_data(node));
            return Ok(());
        }

        let removed = std::mem::take(&mut self.entry_mut(node)?.children);
        for child in &removed {
            self.entry_mut(*child)?.parent = None;
        }
        let mut added = Vec::new();
        if !text.is_empty() {
            let text_node = self.create_text(text);
            self.entry_mut(text_node)?.parent = Some(node);
            self.entry_mut(node)?.children.push(text_node);
            added.push(text_node);
        }
        self.record(node, MutationRecord::child_list(node, added, removed));
        Ok(())
    }

    fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeData::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
        })
    }

    fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::Text(text.to_string()))
    }

    fn insert_child(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>) -> Result<()> {
        if !self.contains(child) {
            return Err(AnnotatorError::StaleNode(child));
        }
        if !self.is_element(parent) {
            return Err(AnnotatorError::InvalidOperation(format!(
                "cannot insert into {parent}: not a live element"
            )));
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(AnnotatorError::InvalidOperation(format!(
                "inserting {child} under {parent} would create a cycle"
            )));
        }
        if let Some(before) = before {
            if self.parent(before) != Some(parent) {
                return Err(AnnotatorError::InvalidOperation(format!(
                    "{before} is not a child of {parent}"
                )));
            }
        }

        if let Some(old_parent) = self.unlink(child)? {
            self.record(
                old_parent,
                MutationRecord::child_list(old_parent, Vec::new(), vec![child]),
            );
        }

        let entry = self.entry_mut(parent)?;
        let position = before
            .and_then(|before| entry.children.iter().position(|c| *c == before))
            .unwrap_or(entry.children.len());
        entry.children.insert(position, child);
        self.entry_mut(child)?.parent = Some(parent);
        self.record(parent, MutationRecord::child_list(parent, vec![child], Vec::new()));
        Ok(())
    }

    fn detach(&mut self, node: NodeId) -> Result<()> {
        if node == self.document {
            return Err(AnnotatorError::InvalidOperation(
                "the document element cannot be detached".to_string(),
            ));
        }
        if let Some(parent) = self.unlink(node)? {
            self.record(parent, MutationRecord::child_list(parent, Vec::new(), vec![node]));
        }
        Ok(())
    }

    fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }
}

/// Declarative description of a subtree, used by scenario files and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default = "default_tag")]
    pub tag: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,

    /// Text placed before any children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSpec>,
}

fn default_tag() -> String {
    "div".to_string()
}

impl Default for NodeSpec {
    fn default() -> Self {
        Self::new(default_tag())
    }
}

impl NodeSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            id: None,
            class: None,
            attrs: BTreeMap::new(),
            text: None,
            children: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = NodeSpec>) -> Self {
        self.children.extend(children);
        self
    }
}
