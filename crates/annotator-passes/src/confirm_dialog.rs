use annotator_core::{NodeId, Result, Selector};
use annotator_engine::{AnnotationPass, PassContext, Region};

use crate::text::{query_text, sel, text_of};

/// Turns confirmation popups into labelled modal dialogs.
pub struct ConfirmDialogPass {
    region: Region,
    title: Selector,
    checkbox: Selector,
    label: Selector,
}

impl ConfirmDialogPass {
    pub fn new() -> Result<Self> {
        let dialog = sel(".ConfirmDialog")?;
        Ok(Self {
            region: Region::new("confirm-dialog", dialog.clone()).on_inserted(dialog),
            title: sel("h3")?,
            checkbox: sel(r#"input[type="checkbox"]"#)?,
            label: sel("label")?,
        })
    }
}

impl AnnotationPass for ConfirmDialogPass {
    fn name(&self) -> &str {
        "confirm-dialog"
    }

    fn region(&self) -> Region {
        self.region.clone()
    }

    fn run(&mut self, ctx: &mut PassContext<'_>, dialog: NodeId) -> Result<()> {
        let title = query_text(ctx.tree(), dialog, &self.title);
        let checkbox = self.checkbox.query(ctx.tree(), dialog).and_then(|checkbox| {
            let tree = ctx.tree();
            if tree.attribute(checkbox, "aria-label").is_some() {
                return None;
            }
            let label = self.label.closest(tree, checkbox)?;
            Some((checkbox, text_of(tree, label))).filter(|(_, text)| !text.is_empty())
        });

        ctx.annotate(dialog, |ctx| {
            ctx.set_attribute(dialog, "role", "dialog")?;
            ctx.set_attribute(dialog, "aria-modal", "true")?;
            if let Some(title) = &title {
                if ctx.tree().attribute(dialog, "aria-labelledby").is_none() {
                    ctx.set_attribute(dialog, "aria-label", title)?;
                }
            }
            if let Some((checkbox, text)) = &checkbox {
                ctx.set_attribute(*checkbox, "aria-label", text)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}
