//! Maps raw mutation records onto the passes that need to re-run.

use std::collections::BTreeSet;

use annotator_core::{ChangeKind, HostTree, MutationRecord, NodeId, PassId, Selector};

/// Where a pass applies and which changes concern it.
#[derive(Debug, Clone)]
pub struct Region {
    pub name: String,
    pub root: RegionRoot,
    /// Changes anywhere inside a region root trigger the pass.
    pub within: bool,
    /// Insertions of matching nodes (or nodes containing a match) trigger the pass.
    pub on_inserted: Vec<Selector>,
    /// Removals of matching nodes trigger the pass.
    pub on_removed: Vec<Selector>,
    /// The pass joins every non-empty batch regardless of what changed.
    pub every_batch: bool,
}

#[derive(Debug, Clone)]
pub enum RegionRoot {
    /// The engine's observed root.
    Observed,
    /// Every element matching the selector inside the observed root.
    Matching(Selector),
}

impl Region {
    pub fn new(name: impl Into<String>, root: Selector) -> Self {
        Self {
            name: name.into(),
            root: RegionRoot::Matching(root),
            within: true,
            on_inserted: Vec::new(),
            on_removed: Vec::new(),
            every_batch: false,
        }
    }

    /// A region spanning the whole observed root. It does not react to
    /// changes on its own; add triggers or make it run every batch.
    pub fn observed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: RegionRoot::Observed,
            within: false,
            on_inserted: Vec::new(),
            on_removed: Vec::new(),
            every_batch: false,
        }
    }

    pub fn on_inserted(mut self, selector: Selector) -> Self {
        self.on_inserted.push(selector);
        self
    }

    pub fn on_removed(mut self, selector: Selector) -> Self {
        self.on_removed.push(selector);
        self
    }

    pub fn every_batch(mut self) -> Self {
        self.every_batch = true;
        self
    }

    /// Root nodes the pass runs against, in document order.
    pub fn roots(&self, tree: &dyn HostTree, observed_root: NodeId) -> Vec<NodeId> {
        match &self.root {
            RegionRoot::Observed => vec![observed_root],
            RegionRoot::Matching(selector) => selector.query_all(tree, observed_root),
        }
    }

    fn contains_change(&self, tree: &dyn HostTree, element: NodeId) -> bool {
        if !self.within {
            return false;
        }
        match &self.root {
            RegionRoot::Observed => true,
            RegionRoot::Matching(selector) => selector.closest(tree, element).is_some(),
        }
    }
}

/// Why a record triggered nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// The target handle no longer refers to a live node.
    Stale,
    /// The target is outside the observed root.
    Detached,
    /// The change was made by the engine itself.
    SelfWrite,
    /// No region is interested.
    Irrelevant,
}

pub struct Classifier {
    regions: Vec<(PassId, Region)>,
    ambient: Vec<PassId>,
    owned_prefixes: Vec<String>,
}

impl Classifier {
    pub fn new(owned_prefixes: Vec<String>) -> Self {
        Self {
            regions: Vec::new(),
            ambient: Vec::new(),
            owned_prefixes,
        }
    }

    pub fn add_region(&mut self, pass: PassId, region: Region) {
        if region.every_batch {
            self.ambient.push(pass);
        }
        self.regions.push((pass, region));
    }

    /// Passes that join every non-empty batch.
    pub fn ambient_passes(&self) -> &[PassId] {
        &self.ambient
    }

    pub fn classify(
        &self,
        tree: &dyn HostTree,
        observed_root: NodeId,
        record: &MutationRecord,
    ) -> Result<BTreeSet<PassId>, Discard> {
        if !tree.contains(record.target) {
            return Err(Discard::Stale);
        }
        let element = tree.element_of(record.target).ok_or(Discard::Detached)?;
        if !tree.is_inclusive_ancestor(observed_root, element) {
            return Err(Discard::Detached);
        }
        if self.is_self_write(tree, record, element) {
            return Err(Discard::SelfWrite);
        }

        let mut passes = BTreeSet::new();
        for (pass, region) in &self.regions {
            if region.contains_change(tree, element)
                || (record.kind == ChangeKind::ChildList
                    && (touches(tree, &record.added_nodes, &region.on_inserted)
                        || touches(tree, &record.removed_nodes, &region.on_removed)))
            {
                passes.insert(*pass);
            }
        }

        if passes.is_empty() {
            Err(Discard::Irrelevant)
        } else {
            Ok(passes)
        }
    }

    fn is_self_write(&self, tree: &dyn HostTree, record: &MutationRecord, element: NodeId) -> bool {
        if tree.within_synthetic(element) {
            return true;
        }
        match record.kind {
            ChangeKind::Attributes => record.attribute_name.as_deref().is_some_and(|name| {
                self.owned_prefixes
                    .iter()
                    .any(|prefix| name.starts_with(prefix.as_str()))
            }),
            ChangeKind::ChildList => {
                let mut nodes = record.added_nodes.iter().chain(&record.removed_nodes).peekable();
                nodes.peek().is_some()
                    && nodes.all(|node| tree.contains(*node) && tree.is_synthetic(*node))
            }
            ChangeKind::CharacterData => false,
        }
    }
}

fn touches(tree: &dyn HostTree, nodes: &[NodeId], selectors: &[Selector]) -> bool {
    if selectors.is_empty() {
        return false;
    }
    nodes.iter().any(|node| {
        tree.contains(*node)
            && tree.is_element(*node)
            && selectors
                .iter()
                .any(|selector| selector.query(tree, *node).is_some())
    })
}
