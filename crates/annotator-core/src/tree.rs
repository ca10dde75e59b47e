//! The seam between the engine and whatever owns the document.
//!
//! The engine never holds node references of its own; it speaks to the host
//! through [`HostTree`] using generational [`NodeId`] handles. A handle whose
//! node has been collected fails every lookup instead of aliasing a newer node.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Attribute carried by every node the engine injects. Mutations inside a
/// subtree rooted at such a node are never treated as host changes.
pub const SYNTHETIC_ATTR: &str = "data-a11y-synthetic";

/// Generational handle to a node in a [`HostTree`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub const fn index(self) -> u32 {
        self.index
    }

    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    ChildList,
    Attributes,
    CharacterData,
}

/// One observed change, in the order the host produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub kind: ChangeKind,
    pub attribute_name: Option<String>,
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
}

impl MutationRecord {
    pub fn child_list(target: NodeId, added_nodes: Vec<NodeId>, removed_nodes: Vec<NodeId>) -> Self {
        Self {
            target,
            kind: ChangeKind::ChildList,
            attribute_name: None,
            added_nodes,
            removed_nodes,
        }
    }

    pub fn attribute(target: NodeId, name: impl Into<String>) -> Self {
        Self {
            target,
            kind: ChangeKind::Attributes,
            attribute_name: Some(name.into()),
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
        }
    }

    pub fn character_data(target: NodeId) -> Self {
        Self {
            target,
            kind: ChangeKind::CharacterData,
            attribute_name: None,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
        }
    }
}

/// Host document as seen by the engine.
///
/// Implementations must buffer a [`MutationRecord`] for every change made to
/// a node connected to [`HostTree::document`], including writes that leave a
/// value unchanged, and hand them out through [`HostTree::take_records`].
pub trait HostTree {
    /// The document element everything connected hangs off.
    fn document(&self) -> NodeId;

    /// Whether the handle still refers to a live node.
    fn contains(&self, node: NodeId) -> bool;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    fn children(&self, node: NodeId) -> Vec<NodeId>;

    fn is_element(&self, node: NodeId) -> bool;

    /// Lower-case tag name, `None` for text nodes and stale handles.
    fn tag_name(&self, node: NodeId) -> Option<&str>;

    fn attribute(&self, node: NodeId, name: &str) -> Option<&str>;

    /// Character data of a text node.
    fn own_text(&self, node: NodeId) -> Option<&str>;

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<()>;

    fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<()>;

    /// Replace the content of a node with a single text child (or set the data
    /// of a text node).
    fn set_text_content(&mut self, node: NodeId, text: &str) -> Result<()>;

    /// Create a detached element.
    fn create_element(&mut self, tag: &str) -> NodeId;

    /// Create a detached text node.
    fn create_text(&mut self, text: &str) -> NodeId;

    /// Insert `child` under `parent`, before `before` when given, moving it
    /// out of its current parent first.
    fn insert_child(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>) -> Result<()>;

    /// Detach a node from its parent. The subtree stays alive.
    fn detach(&mut self, node: NodeId) -> Result<()>;

    /// Drain buffered mutation records.
    fn take_records(&mut self) -> Vec<MutationRecord>;

    fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.attribute(node, "class")
            .map(|classes| classes.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    /// Concatenated character data of all descendant text nodes.
    fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        push_text(self, node, &mut out);
        out
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        if !self.contains(node) {
            return false;
        }
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    fn is_connected(&self, node: NodeId) -> bool {
        self.is_inclusive_ancestor(self.document(), node)
    }

    /// Whether the node itself carries the synthetic marker.
    fn is_synthetic(&self, node: NodeId) -> bool {
        self.attribute(node, SYNTHETIC_ATTR).is_some()
    }

    /// Whether the node or any ancestor was injected by the engine.
    fn within_synthetic(&self, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if self.is_synthetic(current) {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// The node itself when it is an element, otherwise its parent.
    fn element_of(&self, node: NodeId) -> Option<NodeId> {
        if self.is_element(node) {
            Some(node)
        } else {
            self.parent(node)
        }
    }
}

fn push_text<T: HostTree + ?Sized>(tree: &T, node: NodeId, out: &mut String) {
    if let Some(text) = tree.own_text(node) {
        out.push_str(text);
        return;
    }
    for child in tree.children(node) {
        push_text(tree, child, out);
    }
}

/// Collapse runs of whitespace and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
