use annotator_core::{HostTree, NodeId, Result, Selector};
use annotator_engine::{AnnotationPass, PassContext, Region};
use tracing::debug;

use crate::text::{contains_any, query_text, sel};

/// Status lines that describe the chat rather than the peer's activity.
const NOISE: &[&str] = &[
    "last seen",
    "ago",
    "connecting",
    "updating",
    "synchronizing",
    "subscriber",
    "member",
    "bot",
    "monthly users",
];

const STATUS_PREFIX: &str = "User status: ";

/// Keeps the persistent announcement in step with the open chat's header:
/// typing indicators and online status are spoken, chat metadata is not.
pub struct ChatStatusPass {
    region: Region,
    header: Selector,
    info: Selector,
    typing: Selector,
    user_status: Selector,
    status: Selector,
    full_name: Selector,
    last: String,
}

impl ChatStatusPass {
    pub fn new() -> Result<Self> {
        let header = sel(".ChatInfo")?;
        Ok(Self {
            region: Region::new("chat-header", header.clone())
                .on_inserted(header.clone())
                .on_removed(header.clone()),
            header,
            info: sel(".info")?,
            typing: sel("p.typing-status")?,
            user_status: sel(".status .user-status")?,
            status: sel(".status")?,
            full_name: sel(".fullName")?,
            last: String::new(),
        })
    }

    /// The status worth speaking, or an empty string.
    pub fn extract(&self, tree: &dyn HostTree, header: NodeId) -> String {
        let scope = self.info.query(tree, header).unwrap_or(header);

        if let Some(typing) = query_text(tree, scope, &self.typing) {
            return filter_noise(typing.trim_end_matches("...").trim_end());
        }
        if let Some(status) = query_text(tree, scope, &self.user_status) {
            return filter_noise(&status);
        }
        if let Some(status) = query_text(tree, scope, &self.status) {
            let name = query_text(tree, scope, &self.full_name).unwrap_or_default();
            if status != name {
                return filter_noise(&status);
            }
        }
        String::new()
    }

    fn publish(&mut self, ctx: &mut PassContext<'_>, status: String) -> Result<()> {
        if status == self.last {
            return Ok(());
        }
        debug!(from = %self.last, to = %status, "chat status changed");
        ctx.announce_persistent(&spoken(&status))?;
        self.last = status;
        Ok(())
    }
}

/// The persistent announcement for a status; empty clears.
pub fn spoken(status: &str) -> String {
    if status.is_empty() {
        String::new()
    } else {
        format!("{STATUS_PREFIX}{status}")
    }
}

fn filter_noise(text: &str) -> String {
    if contains_any(text, NOISE) {
        String::new()
    } else {
        text.to_string()
    }
}

impl AnnotationPass for ChatStatusPass {
    fn name(&self) -> &str {
        "chat-status"
    }

    fn region(&self) -> Region {
        self.region.clone()
    }

    /// Only the first header on the page describes the open chat; side
    /// panels reuse the same markup without a status.
    fn run(&mut self, ctx: &mut PassContext<'_>, root: NodeId) -> Result<()> {
        if self.header.query(ctx.tree(), ctx.observed_root()) != Some(root) {
            return Ok(());
        }
        let status = self.extract(ctx.tree(), root);
        self.publish(ctx, status)
    }

    fn region_absent(&mut self, ctx: &mut PassContext<'_>) -> Result<()> {
        self.publish(ctx, String::new())
    }
}
