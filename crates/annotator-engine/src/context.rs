use std::time::Instant;

use annotator_core::{content_signature, HostTree, MarkerStore, NodeId, PassId, Result, SYNTHETIC_ATTR};
use tracing::{trace, warn};

use crate::announce::AnnouncementChannel;

/// Everything a pass may touch while it runs.
///
/// Markers and signatures are scoped to the running pass. Writes go through
/// helpers that skip unchanged values, and injected nodes carry the synthetic
/// attribute so their mutations are never mistaken for host changes.
pub struct PassContext<'a> {
    tree: &'a mut dyn HostTree,
    markers: &'a mut MarkerStore,
    channel: &'a mut AnnouncementChannel,
    pass: PassId,
    pass_name: &'a str,
    observed_root: NodeId,
    now: Instant,
    replaying: bool,
    mirror_markers: bool,
    writes: usize,
    injected: Vec<NodeId>,
}

impl<'a> PassContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        tree: &'a mut dyn HostTree,
        markers: &'a mut MarkerStore,
        channel: &'a mut AnnouncementChannel,
        pass: PassId,
        pass_name: &'a str,
        observed_root: NodeId,
        now: Instant,
        replaying: bool,
        mirror_markers: bool,
    ) -> Self {
        Self {
            tree,
            markers,
            channel,
            pass,
            pass_name,
            observed_root,
            now,
            replaying,
            mirror_markers,
            writes: 0,
            injected: Vec::new(),
        }
    }

    pub fn tree(&self) -> &dyn HostTree {
        &*self.tree
    }

    pub fn pass_id(&self) -> PassId {
        self.pass
    }

    pub fn pass_name(&self) -> &str {
        self.pass_name
    }

    pub fn observed_root(&self) -> NodeId {
        self.observed_root
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// True during the initial run over content that existed before the
    /// engine attached. Transient announcements are dropped while replaying.
    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    /// Number of tree writes made through this context.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn is_marked(&self, node: NodeId) -> bool {
        self.markers.is_marked(node, self.pass)
    }

    pub fn mark(&mut self, node: NodeId) -> Result<()> {
        if self.markers.mark(node, self.pass) && self.mirror_markers {
            let name = format!("data-a11y-{}", self.pass_name);
            self.set_attribute(node, &name, "true")?;
        }
        Ok(())
    }

    /// Run `annotate` for an unmarked node and mark it on success. A failed
    /// annotation leaves the node unmarked so a later batch retries it, and
    /// nodes it injected before failing are detached again.
    pub fn annotate<F>(&mut self, node: NodeId, annotate: F) -> Result<bool>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if self.is_marked(node) {
            return Ok(false);
        }
        let start = self.injected.len();
        if let Err(err) = annotate(self) {
            self.discard_injected(start);
            return Err(err);
        }
        self.mark(node)?;
        Ok(true)
    }

    fn discard_injected(&mut self, start: usize) {
        for node in self.injected.drain(start..).rev() {
            if !self.tree.contains(node) || self.tree.parent(node).is_none() {
                continue;
            }
            match self.tree.detach(node) {
                Ok(()) => self.writes += 1,
                Err(err) => {
                    warn!(pass = self.pass_name, %node, error = %err, "failed to detach injected node");
                }
            }
        }
    }

    pub fn signature_changed(&self, node: NodeId, content: &str) -> bool {
        self.markers.signature_changed(node, self.pass, content)
    }

    pub fn record_signature(&mut self, node: NodeId, content: &str) {
        self.markers
            .set_signature(node, self.pass, content_signature(content));
    }

    /// Returns `false` when the attribute already had this value.
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<bool> {
        if self.tree.attribute(node, name) == Some(value) {
            return Ok(false);
        }
        self.tree.set_attribute(node, name, value)?;
        self.writes += 1;
        trace!(pass = self.pass_name, %node, name, value, "attribute written");
        Ok(true)
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<bool> {
        if self.tree.attribute(node, name).is_none() {
            return Ok(false);
        }
        self.tree.remove_attribute(node, name)?;
        self.writes += 1;
        Ok(true)
    }

    /// Replace a node's text. Returns `false` when it already read `text`.
    pub fn set_text(&mut self, node: NodeId, text: &str) -> Result<bool> {
        if self.tree.text_content(node) == text {
            return Ok(false);
        }
        self.tree.set_text_content(node, text)?;
        self.writes += 1;
        Ok(true)
    }

    /// Create a synthetic element under `parent`, before `before` if given.
    pub fn inject(&mut self, parent: NodeId, tag: &str, before: Option<NodeId>) -> Result<NodeId> {
        let node = self.tree.create_element(tag);
        self.tree.set_attribute(node, SYNTHETIC_ATTR, self.pass_name)?;
        self.tree.insert_child(parent, node, before)?;
        self.writes += 1;
        self.injected.push(node);
        Ok(node)
    }

    pub fn announce_persistent(&mut self, text: &str) -> Result<()> {
        self.channel
            .announce_persistent(&mut *self.tree, text, self.now)
    }

    /// Returns `false` if the announcement was dropped because the engine is
    /// replaying pre-existing content.
    pub fn announce_transient(&mut self, text: &str) -> Result<bool> {
        if self.replaying {
            trace!(pass = self.pass_name, text, "transient announcement suppressed during replay");
            return Ok(false);
        }
        self.channel
            .announce_transient(&mut *self.tree, text, self.now)?;
        Ok(true)
    }

    /// What the live region currently holds.
    pub fn current_announcement(&self) -> &str {
        self.channel.current()
    }
}
