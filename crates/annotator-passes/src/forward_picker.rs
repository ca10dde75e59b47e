use annotator_core::{HostTree, NodeId, Result, Selector};
use annotator_engine::{AnnotationPass, PassContext, Region};

use crate::text::{contains_any, query_text, sel};

/// Labels the entries of the "forward to" chat picker with the kind of chat
/// each one is.
pub struct ForwardPickerPass {
    region: Region,
    item: Selector,
    name: Selector,
    subtitle: Selector,
    avatar: Selector,
}

impl ForwardPickerPass {
    pub fn new() -> Result<Self> {
        let picker = sel(".Modal.ChatOrUserPicker")?;
        Ok(Self {
            region: Region::new("forward-picker", picker.clone()).on_inserted(picker),
            item: sel(".ChatOrUserPicker-item")?,
            name: sel(".fullName")?,
            subtitle: sel(".subtitle")?,
            avatar: sel(".Avatar")?,
        })
    }

    pub fn describe(&self, tree: &dyn HostTree, item: NodeId) -> Option<String> {
        let name = query_text(tree, item, &self.name)?;
        let subtitle = query_text(tree, item, &self.subtitle).unwrap_or_default();
        let avatar_has = |class: &str| {
            self.avatar
                .query(tree, item)
                .is_some_and(|avatar| tree.has_class(avatar, class))
        };

        if avatar_has("saved-messages") {
            return Some(format!("{name}. {subtitle}").trim_end().to_string());
        }
        let prefix = if contains_any(&subtitle, &["subscriber"]) {
            format!("Channel: {name}. ")
        } else if contains_any(&subtitle, &["member"]) || avatar_has("forum") {
            format!("Group: {name}. ")
        } else if contains_any(&subtitle, &["bot"]) {
            format!("Bot: {name}. ")
        } else if contains_any(&subtitle, &["last seen", "online", "monthly users"])
            || avatar_has("private")
        {
            format!("Chat with {name}. ")
        } else if !subtitle.is_empty() {
            format!("Group: {name}. ")
        } else {
            format!("Chat with {name}. ")
        };
        Some(format!("{prefix}{subtitle}").trim_end().to_string())
    }
}

impl AnnotationPass for ForwardPickerPass {
    fn name(&self) -> &str {
        "forward-picker"
    }

    fn region(&self) -> Region {
        self.region.clone()
    }

    fn run(&mut self, ctx: &mut PassContext<'_>, root: NodeId) -> Result<()> {
        for item in self.item.query_all(ctx.tree(), root) {
            let Some(label) = self.describe(ctx.tree(), item) else {
                continue;
            };
            ctx.annotate(item, |ctx| ctx.set_attribute(item, "aria-label", &label).map(|_| ()))?;
        }
        Ok(())
    }
}
