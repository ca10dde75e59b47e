use std::hash::BuildHasher;

use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::tree::{HostTree, NodeId};

/// Identity of a registered annotation pass: its registration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PassId(pub u16);

impl PassId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Hash of derived content, compared to decide whether to rewrite.
pub fn content_signature(content: &str) -> u64 {
    FxBuildHasher.hash_one(content)
}

/// Side table of per-(node, pass) state: idempotence markers and content
/// signatures. Nothing here is visible in the host tree.
#[derive(Debug, Default, Clone)]
pub struct MarkerStore {
    marked: FxHashSet<(NodeId, PassId)>,
    signatures: FxHashMap<(NodeId, PassId), u64>,
}

impl MarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_marked(&self, node: NodeId, pass: PassId) -> bool {
        self.marked.contains(&(node, pass))
    }

    /// Returns `false` if the node was already marked for this pass.
    pub fn mark(&mut self, node: NodeId, pass: PassId) -> bool {
        self.marked.insert((node, pass))
    }

    pub fn signature(&self, node: NodeId, pass: PassId) -> Option<u64> {
        self.signatures.get(&(node, pass)).copied()
    }

    pub fn set_signature(&mut self, node: NodeId, pass: PassId, signature: u64) {
        self.signatures.insert((node, pass), signature);
    }

    /// Whether `content` differs from what was last recorded for the node.
    pub fn signature_changed(&self, node: NodeId, pass: PassId, content: &str) -> bool {
        self.signature(node, pass) != Some(content_signature(content))
    }

    /// Drop entries whose node no longer exists in `tree`. Returns the number
    /// of entries removed.
    pub fn sweep(&mut self, tree: &dyn HostTree) -> usize {
        let before = self.len();
        self.marked.retain(|(node, _)| tree.contains(*node));
        self.signatures.retain(|(node, _), _| tree.contains(*node));
        let removed = before - self.len();
        if removed > 0 {
            debug!(removed, remaining = self.len(), "swept stale markers");
        }
        removed
    }

    /// Markers plus signatures.
    pub fn len(&self) -> usize {
        self.marked.len() + self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marked.is_empty() && self.signatures.is_empty()
    }
}
