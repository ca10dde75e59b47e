//! Text extraction shared by the passes.

use annotator_core::{normalize_whitespace, HostTree, NodeId, Result, Selector};

/// Shorthand for building pass selectors.
pub fn sel(source: &str) -> Result<Selector> {
    Selector::parse(source)
}

/// Normalized text of a node.
pub fn text_of(tree: &dyn HostTree, node: NodeId) -> String {
    normalize_whitespace(&tree.text_content(node))
}

/// Normalized text of the first match under `scope`, `None` when there is no
/// match or it reads empty.
pub fn query_text(tree: &dyn HostTree, scope: NodeId, selector: &Selector) -> Option<String> {
    selector
        .query(tree, scope)
        .map(|node| text_of(tree, node))
        .filter(|text| !text.is_empty())
}

/// Case-insensitive substring test against several needles.
pub fn contains_any(text: &str, needles: &[&str]) -> bool {
    let lower = text.to_lowercase();
    needles.iter().any(|needle| lower.contains(needle))
}

/// Readable text of a rich-text node: subtrees matching `skip` are left out
/// and emoji images are read as their alt text.
pub struct RichText {
    skip: Selector,
    emoji: Selector,
}

impl RichText {
    pub fn new() -> Result<Self> {
        Ok(Self {
            skip: sel(".Reactions, .MessageMeta")?,
            emoji: sel("img.emoji, .custom-emoji")?,
        })
    }

    pub fn read(&self, tree: &dyn HostTree, node: NodeId) -> String {
        let mut out = String::new();
        self.push(tree, node, &mut out);
        normalize_whitespace(&out)
    }

    fn push(&self, tree: &dyn HostTree, node: NodeId, out: &mut String) {
        if let Some(text) = tree.own_text(node) {
            out.push_str(text);
            return;
        }
        if self.skip.matches(tree, node) {
            return;
        }
        if self.emoji.matches(tree, node) {
            let alt = tree
                .attribute(node, "alt")
                .or_else(|| tree.attribute(node, "data-alt"));
            if let Some(alt) = alt {
                out.push_str(alt);
                return;
            }
        }
        for child in tree.children(node) {
            self.push(tree, child, out);
        }
    }
}
