use annotator_core::{NodeId, Result, Selector};
use annotator_engine::{AnnotationPass, PassContext, Region};

use crate::text::sel;

/// Makes the "unread messages" divider a navigable heading.
pub struct UnreadDividerPass {
    region: Region,
    divider: Selector,
}

impl UnreadDividerPass {
    pub fn new() -> Result<Self> {
        Ok(Self {
            region: Region::new("message-list", sel(".MessageList")?),
            divider: sel(".unread-divider")?,
        })
    }
}

impl AnnotationPass for UnreadDividerPass {
    fn name(&self) -> &str {
        "unread-divider"
    }

    fn region(&self) -> Region {
        self.region.clone()
    }

    fn after(&self) -> &[&str] {
        &["messages"]
    }

    fn run(&mut self, ctx: &mut PassContext<'_>, root: NodeId) -> Result<()> {
        for divider in self.divider.query_all(ctx.tree(), root) {
            ctx.set_attribute(divider, "role", "heading")?;
            ctx.set_attribute(divider, "aria-level", "2")?;
            ctx.set_attribute(divider, "tabindex", "0")?;
        }
        Ok(())
    }
}
