use annotator_core::{HostTree, NodeId, Result, Selector};
use annotator_engine::{AnnotationPass, PassContext, Region};

use crate::text::{contains_any, query_text, sel};

/// Labels global search results with the kind of peer each one is.
pub struct SearchResultsPass {
    region: Region,
    result: Selector,
    name: Selector,
    status: Selector,
}

impl SearchResultsPass {
    pub fn new() -> Result<Self> {
        let content = sel(".LeftSearch--content")?;
        Ok(Self {
            region: Region::new("left-search", content.clone()).on_inserted(content),
            result: sel(".ListItem.search-result .ListItem-button")?,
            name: sel(".fullName")?,
            status: sel(".status")?,
        })
    }

    pub fn describe(&self, tree: &dyn HostTree, result: NodeId) -> Option<String> {
        let name = query_text(tree, result, &self.name)?;
        let status = query_text(tree, result, &self.status)?;
        let prefix = if contains_any(&status, &["subscriber"]) {
            format!("Channel: {name}. ")
        } else if contains_any(&status, &["member"]) {
            format!("Group: {name}. ")
        } else if contains_any(&status, &["bot"]) {
            format!("Bot: {name}. ")
        } else if contains_any(&status, &["last seen", "online"]) {
            format!("User: {name}. ")
        } else {
            format!("{name}. ")
        };
        Some(format!("{prefix}{status}"))
    }
}

impl AnnotationPass for SearchResultsPass {
    fn name(&self) -> &str {
        "search-results"
    }

    fn region(&self) -> Region {
        self.region.clone()
    }

    fn run(&mut self, ctx: &mut PassContext<'_>, root: NodeId) -> Result<()> {
        for result in self.result.query_all(ctx.tree(), root) {
            let Some(label) = self.describe(ctx.tree(), result) else {
                continue;
            };
            ctx.annotate(result, |ctx| {
                ctx.set_attribute(result, "aria-label", &label).map(|_| ())
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annotator_core::{MemoryTree, NodeSpec};

    fn describe(status: Option<&str>) -> Option<String> {
        let mut button = NodeSpec::new("div")
            .with_class("ListItem-button")
            .with_child(NodeSpec::new("h3").with_class("fullName").with_text("Ferris"));
        if let Some(status) = status {
            button = button.with_child(NodeSpec::new("span").with_class("status").with_text(status));
        }
        let tree = MemoryTree::from_specs(&[NodeSpec::new("div")
            .with_class("ListItem search-result")
            .with_child(button)])
        .unwrap();
        let result = tree.find(".ListItem-button").unwrap().unwrap();
        SearchResultsPass::new().unwrap().describe(&tree, result)
    }

    #[test]
    fn test_search_result_prefixes() {
        assert_eq!(
            describe(Some("last seen recently")).as_deref(),
            Some("User: Ferris. last seen recently")
        );
        assert_eq!(
            describe(Some("4 members")).as_deref(),
            Some("Group: Ferris. 4 members")
        );
        assert_eq!(describe(Some("@ferris")).as_deref(), Some("Ferris. @ferris"));
        assert_eq!(describe(None), None);
    }
}
