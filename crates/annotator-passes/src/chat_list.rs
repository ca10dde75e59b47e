use annotator_core::{HostTree, NodeId, Result, Selector};
use annotator_engine::{AnnotationPass, PassContext, Region};

use crate::text::{query_text, sel};

/// Labels chat list entries with their type, unread count, last message and
/// time. Entries are relabelled only when that summary changes.
pub struct ChatListPass {
    region: Region,
    chat: Selector,
    link: Selector,
    name: Selector,
    time: Selector,
    message: Selector,
    sender: Selector,
    unread: Selector,
}

impl ChatListPass {
    pub fn new() -> Result<Self> {
        Ok(Self {
            region: Region::new("left-column", sel("#LeftColumn")?),
            chat: sel(".ListItem.Chat")?,
            link: sel("a.ListItem-button")?,
            name: sel(".fullName")?,
            time: sel(".time")?,
            message: sel(".last-message-summary")?,
            sender: sel(".sender-name")?,
            unread: sel(".ChatBadge.unread")?,
        })
    }

    /// Label for one `.ListItem.Chat`, `None` while its name, time or last
    /// message is still missing.
    pub fn describe(&self, tree: &dyn HostTree, chat: NodeId) -> Option<String> {
        let name = query_text(tree, chat, &self.name)?;
        let time = query_text(tree, chat, &self.time)?;
        let message = query_text(tree, chat, &self.message)?;
        let sender_node = self.sender.query(tree, chat);
        let sender = query_text(tree, chat, &self.sender);

        let mut label = if tree.has_class(chat, "private") {
            format!("{name}. ")
        } else if tree.has_class(chat, "forum") || sender_node.is_some() {
            format!("Group: {name}. ")
        } else {
            format!("Channel: {name}. ")
        };
        if let Some(unread) = query_text(tree, chat, &self.unread) {
            label.push_str(&format!("{unread} unread messages. "));
        }
        match sender {
            Some(sender) => label.push_str(&format!("from {sender}: {message}. ")),
            None => label.push_str(&format!("{message}. ")),
        }
        label.push_str(&format!("{time}."));
        Some(label)
    }
}

impl AnnotationPass for ChatListPass {
    fn name(&self) -> &str {
        "chat-list"
    }

    fn region(&self) -> Region {
        self.region.clone()
    }

    fn run(&mut self, ctx: &mut PassContext<'_>, root: NodeId) -> Result<()> {
        let chats = self.chat.query_all(ctx.tree(), root);
        for chat in chats {
            let Some(link) = self.link.query(ctx.tree(), chat) else {
                continue;
            };
            let Some(label) = self.describe(ctx.tree(), chat) else {
                continue;
            };
            if ctx.signature_changed(chat, &label) {
                ctx.set_attribute(link, "aria-label", &label)?;
                ctx.record_signature(chat, &label);
            }
        }
        Ok(())
    }
}
