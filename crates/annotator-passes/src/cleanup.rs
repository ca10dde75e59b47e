//! Ambient passes that keep decorative or duplicate controls out of the
//! accessibility tree. Both run on every batch.

use annotator_core::{NodeId, Result, Selector};
use annotator_engine::{AnnotationPass, PassContext, Region};

use crate::text::sel;

/// Hides the selection toolbar and the floating "next mention" and "next
/// reaction" jump buttons.
pub struct CleanupPass {
    toolbar: Selector,
    jump_buttons: Selector,
}

impl CleanupPass {
    pub fn new() -> Result<Self> {
        Ok(Self {
            toolbar: sel(".MessageSelectToolbar")?,
            jump_buttons: sel(
                r#"button[aria-label="Go to next mention"], button[aria-label="Go to next unread reactions"]"#,
            )?,
        })
    }
}

impl AnnotationPass for CleanupPass {
    fn name(&self) -> &str {
        "cleanup"
    }

    fn region(&self) -> Region {
        Region::observed("cleanup").every_batch()
    }

    fn run(&mut self, ctx: &mut PassContext<'_>, root: NodeId) -> Result<()> {
        let mut hidden = Vec::new();
        {
            let tree = ctx.tree();
            hidden.extend(self.toolbar.query(tree, root));
            hidden.extend(
                self.jump_buttons
                    .query_all(tree, root)
                    .into_iter()
                    .filter_map(|button| tree.parent(button)),
            );
        }
        for node in hidden {
            ctx.set_attribute(node, "aria-hidden", "true")?;
        }
        Ok(())
    }
}

/// Hides the composer's measuring clone and its placeholder text.
pub struct HideInvisiblePass {
    region: Region,
    targets: Selector,
}

impl HideInvisiblePass {
    pub fn new() -> Result<Self> {
        let clone = sel(".custom-scroll.input-scroller.clone")?;
        let placeholder = sel("#message-input-text .placeholder-text")?;
        Ok(Self {
            region: Region::observed("composer")
                .every_batch()
                .on_inserted(clone)
                .on_inserted(placeholder),
            targets: sel(
                ".custom-scroll.input-scroller.clone, #message-input-text .placeholder-text",
            )?,
        })
    }
}

impl AnnotationPass for HideInvisiblePass {
    fn name(&self) -> &str {
        "hide-invisible"
    }

    fn region(&self) -> Region {
        self.region.clone()
    }

    fn run(&mut self, ctx: &mut PassContext<'_>, root: NodeId) -> Result<()> {
        for node in self.targets.query_all(ctx.tree(), root) {
            if ctx.tree().attribute(node, "aria-hidden").is_some() {
                continue;
            }
            ctx.set_attribute(node, "aria-hidden", "true")?;
            ctx.set_attribute(node, "tabindex", "-1")?;
        }
        Ok(())
    }
}
