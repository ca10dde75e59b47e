//! Message overlays.
//!
//! Every message in the list gets one focusable heading injected into its
//! content wrapper. The heading carries a spoken summary of the message
//! (sender, media kind, text, reply context, time, delivery status, views)
//! and everything else inside the wrapper is hidden from assistive
//! technology, so a screen reader lands on exactly one stop per message.
//!
//! Outside the initial replay the newest message is also announced, once per
//! message id.

use annotator_core::{HostTree, NodeId, Result, Selector};
use annotator_engine::{AnnotationPass, PassContext, Region};
use tracing::debug;

use crate::text::{query_text, sel, text_of, RichText};

/// Spoken summary of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLabel {
    pub parts: Vec<String>,
}

/// Screen readers pause on the line break between fields.
const PART_SEPARATOR: &str = " \n";

impl MessageLabel {
    pub fn text(&self) -> String {
        self.parts.join(PART_SEPARATOR)
    }
}

struct Selectors {
    message: Selector,
    wrapper: Selector,
    sticker: Selector,
    sticker_emoji: Selector,
    gif: Selector,
    gif_media: Selector,
    message_text: Selector,
    sender: Selector,
    forwarded: Selector,
    text: Selector,
    voice: Selector,
    voice_duration: Selector,
    music: Selector,
    music_title: Selector,
    music_performer: Selector,
    music_duration: Selector,
    reply: Selector,
    reply_sender: Selector,
    reply_text: Selector,
    album: Selector,
    album_item: Selector,
    video_marker: Selector,
    file: Selector,
    file_name: Selector,
    file_size: Selector,
    video: Selector,
    media: Selector,
    time: Selector,
    outgoing_status: Selector,
    views: Selector,
    interactive: Selector,
}

impl Selectors {
    fn new() -> Result<Self> {
        Ok(Self {
            message: sel(".Message")?,
            wrapper: sel(".message-content-wrapper")?,
            sticker: sel(".sticker-image")?,
            sticker_emoji: sel(".emoji-small")?,
            gif: sel(".message-media-gif, .media-inner.is-document.is-animated")?,
            gif_media: sel("img, video")?,
            message_text: sel(".message-text")?,
            sender: sel(".message-title .sender-title")?,
            forwarded: sel(".message-title-wrapper .label")?,
            text: sel(".text-content")?,
            voice: sel(".message-content.voice")?,
            voice_duration: sel(".voice-duration")?,
            music: sel(".Audio.inline")?,
            music_title: sel(".Audio .title")?,
            music_performer: sel(".Audio .performer")?,
            music_duration: sel(".Audio .duration")?,
            reply: sel(".message-subheader .EmbeddedMessage")?,
            reply_sender: sel(".embedded-sender")?,
            reply_text: sel(".embedded-text-wrapper")?,
            album: sel(".Album")?,
            album_item: sel(".media-inner")?,
            video_marker: sel("video, .message-media-duration")?,
            file: sel(".File")?,
            file_name: sel(".file-title")?,
            file_size: sel(".file-subtitle")?,
            video: sel("video, .message-media-duration, .icon-large-play")?,
            media: sel(".media-inner")?,
            time: sel(".message-time")?,
            outgoing_status: sel(".MessageOutgoingStatus i")?,
            views: sel(".message-views")?,
            interactive: sel(
                r#"button, a, [role="button"], input, .Reactions, .sticker-image, .message-media-gif, .media-inner.is-document.is-animated"#,
            )?,
        })
    }
}

pub struct MessagesPass {
    region: Region,
    select: Selectors,
    rich: RichText,
    last_announced: Option<String>,
}

impl MessagesPass {
    pub fn new() -> Result<Self> {
        Ok(Self {
            region: Region::new("message-list", sel(".MessageList")?),
            select: Selectors::new()?,
            rich: RichText::new()?,
            last_announced: None,
        })
    }

    /// Id of the last message announced.
    pub fn last_announced(&self) -> Option<&str> {
        self.last_announced.as_deref()
    }

    /// Build the summary for a message.
    pub fn describe(&self, tree: &dyn HostTree, message: NodeId) -> MessageLabel {
        let s = &self.select;
        let query = |selector: &Selector| query_text(tree, message, selector);
        let own = tree.has_class(message, "own");
        let mut parts = Vec::new();

        if let Some((_, media)) = self.media_label(tree, message) {
            parts.push(media);
        }

        if own {
            parts.push("Your message.".to_string());
        } else if let Some(sender) = query(&s.sender) {
            if s.forwarded.query(tree, message).is_some() {
                parts.push(format!("Forwarded from {sender}."));
            } else {
                parts.push(format!("From {sender}."));
            }
        }

        if s.voice.query(tree, message).is_some() {
            match query(&s.voice_duration) {
                Some(duration) => parts.push(format!("Voice message. Duration: {duration}.")),
                None => parts.push("Voice message.".to_string()),
            }
        } else if s.music.query(tree, message).is_some() {
            let title = query(&s.music_title).unwrap_or_else(|| "Untitled".to_string());
            let performer =
                query(&s.music_performer).unwrap_or_else(|| "Unknown Artist".to_string());
            parts.push(format!("Music file. {performer} - {title}."));
            if let Some(duration) = query(&s.music_duration) {
                parts.push(format!("Duration: {duration}."));
            }
        }

        if let Some(text) = s.text.query(tree, message) {
            let text = self.rich.read(tree, text);
            if !text.is_empty() {
                parts.push(text);
            }
        }

        if let Some(reply) = s.reply.query(tree, message) {
            let mut label = "In reply to".to_string();
            if let Some(sender) = query_text(tree, reply, &s.reply_sender) {
                label.push_str(&format!(" message from {sender}"));
            }
            if let Some(text) = query_text(tree, reply, &s.reply_text) {
                label.push_str(&format!(": {text}"));
            }
            label.push('.');
            parts.push(label);
        }

        if let Some(album) = s.album.query(tree, message) {
            parts.insert(0, self.album_label(tree, album));
        } else if let Some(file) = s.file.query(tree, message) {
            parts.insert(0, "File.".to_string());
            if let Some(name) = query_text(tree, file, &s.file_name) {
                parts.push(format!("File name: {name}."));
            }
            if let Some(size) = query_text(tree, file, &s.file_size) {
                parts.push(format!("File size: {size}."));
            }
        } else if s.video.query(tree, message).is_some() {
            parts.insert(0, "Video.".to_string());
        } else if s.media.query(tree, message).is_some() {
            parts.insert(0, "Photo.".to_string());
        }

        if let Some(time) = query(&s.time) {
            let mut meta = format!("Time: {time}.");
            if own {
                if let Some(status) = self.delivery_status(tree, message) {
                    meta.push_str(&format!(" Status: {status}."));
                }
            }
            parts.push(meta);
        }

        if let Some(views) = query(&s.views) {
            parts.push(format!("{views} views."));
        }

        MessageLabel { parts }
    }

    /// Label for a sticker or animated GIF, with the node that should carry it.
    fn media_label(&self, tree: &dyn HostTree, message: NodeId) -> Option<(NodeId, String)> {
        let s = &self.select;
        if let Some(sticker) = s.sticker.query(tree, message) {
            let emoji = s.sticker_emoji.query(tree, message).and_then(|node| {
                tree.attribute(node, "alt")
                    .filter(|alt| !alt.is_empty())
                    .map(str::to_string)
                    .or_else(|| Some(text_of(tree, node)))
                    .filter(|text| !text.is_empty())
            });
            let label = match emoji {
                Some(emoji) => format!("Sticker: {emoji}"),
                None => "Sticker".to_string(),
            };
            return Some((sticker, label));
        }

        let gif = s.gif.query(tree, message)?;
        let label = match query_text(tree, message, &s.message_text) {
            Some(caption) => format!("Animated GIF: {caption}"),
            None => "Animated GIF".to_string(),
        };
        let target = s.gif_media.query(tree, gif).unwrap_or(gif);
        Some((target, label))
    }

    fn album_label(&self, tree: &dyn HostTree, album: NodeId) -> String {
        let items = self.select.album_item.query_all(tree, album);
        let videos = items
            .iter()
            .filter(|item| self.select.video_marker.query(tree, **item).is_some())
            .count();
        let photos = items.len() - videos;

        let mut label = format!("Album with {} items", items.len());
        if photos > 0 {
            label.push_str(&format!(": {photos} photos"));
        }
        if videos > 0 {
            let joiner = if photos > 0 { " and" } else { ":" };
            label.push_str(&format!("{joiner} {videos} videos"));
        }
        label.push('.');
        label
    }

    fn delivery_status(&self, tree: &dyn HostTree, message: NodeId) -> Option<&'static str> {
        let icon = self.select.outgoing_status.query(tree, message)?;
        [
            ("icon-message-read", "Read"),
            ("icon-message-succeeded", "Sent, not yet seen"),
            ("icon-clock", "Sending"),
            ("icon-error", "Failed to send"),
        ]
        .into_iter()
        .find(|(class, _)| tree.has_class(icon, class))
        .map(|(_, status)| status)
    }

    fn annotate_message(
        &self,
        ctx: &mut PassContext<'_>,
        message: NodeId,
        wrapper: NodeId,
        label: &str,
    ) -> Result<()> {
        if let Some((media, media_label)) = self.media_label(ctx.tree(), message) {
            ctx.set_attribute(media, "aria-label", &media_label)?;
        }

        let overlay = ctx.inject(wrapper, "div", None)?;
        ctx.set_attribute(overlay, "role", "heading")?;
        ctx.set_attribute(overlay, "aria-level", "3")?;
        ctx.set_attribute(overlay, "aria-label", label)?;
        ctx.set_attribute(overlay, "tabindex", "0")?;

        let inner: Vec<NodeId> = {
            let tree = ctx.tree();
            self.select
                .interactive
                .query_all(tree, wrapper)
                .into_iter()
                .filter(|node| *node != overlay)
                .filter(|node| self.select.wrapper.closest(tree, *node) == Some(wrapper))
                .collect()
        };
        for node in inner {
            ctx.set_attribute(node, "aria-hidden", "true")?;
            ctx.set_attribute(node, "tabindex", "-1")?;
        }
        Ok(())
    }

    fn announce_latest(
        &mut self,
        ctx: &mut PassContext<'_>,
        root: NodeId,
        annotated: &[(NodeId, String)],
    ) -> Result<()> {
        let latest = self
            .select
            .message
            .query_all(ctx.tree(), root)
            .into_iter()
            .filter(|node| !ctx.tree().has_class(*node, "service-message"))
            .last();
        let Some(latest) = latest else {
            return Ok(());
        };
        let Some((_, text)) = annotated.iter().find(|(node, _)| *node == latest) else {
            return Ok(());
        };
        if text.is_empty() {
            return Ok(());
        }

        let id = {
            let tree = ctx.tree();
            tree.attribute(latest, "id")
                .or_else(|| tree.attribute(latest, "data-message-id"))
                .map(str::to_string)
        };
        match id {
            Some(id) if self.last_announced.as_deref() != Some(id.as_str()) => {
                if ctx.announce_transient(text)? {
                    debug!(message = %id, "new message announced");
                    self.last_announced = Some(id);
                }
            }
            None if ctx.current_announcement() != text => {
                if ctx.announce_transient(text)? {
                    self.last_announced = None;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl AnnotationPass for MessagesPass {
    fn name(&self) -> &str {
        "messages"
    }

    fn region(&self) -> Region {
        self.region.clone()
    }

    fn run(&mut self, ctx: &mut PassContext<'_>, root: NodeId) -> Result<()> {
        let messages = self.select.message.query_all(ctx.tree(), root);
        let mut annotated = Vec::new();

        for message in messages {
            if ctx.is_marked(message) {
                continue;
            }
            // Still rendering: try again on a later batch.
            let Some(wrapper) = self.select.wrapper.query(ctx.tree(), message) else {
                continue;
            };
            let label = self.describe(ctx.tree(), message).text();
            if ctx.annotate(message, |ctx| self.annotate_message(ctx, message, wrapper, &label))? {
                annotated.push((message, label));
            }
        }

        if !annotated.is_empty() {
            debug!(count = annotated.len(), "messages annotated");
            self.announce_latest(ctx, root, &annotated)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annotator_core::{MemoryTree, NodeSpec};

    fn message(class: &str, content: Vec<NodeSpec>) -> NodeSpec {
        NodeSpec::new("div")
            .with_class(format!("Message {class}"))
            .with_attr("id", "message-1")
            .with_child(
                NodeSpec::new("div")
                    .with_class("message-content-wrapper")
                    .with_children(content),
            )
    }

    fn describe(spec: NodeSpec) -> String {
        let tree = MemoryTree::from_specs(&[spec]).unwrap();
        let node = tree.find(".Message").unwrap().unwrap();
        MessagesPass::new().unwrap().describe(&tree, node).text()
    }

    fn time(text: &str) -> NodeSpec {
        NodeSpec::new("span").with_class("message-time").with_text(text)
    }

    #[test]
    fn test_incoming_text_message() {
        let label = describe(message(
            "",
            vec![
                NodeSpec::new("div").with_class("message-title").with_child(
                    NodeSpec::new("span").with_class("sender-title").with_text("Ferris"),
                ),
                NodeSpec::new("div")
                    .with_class("text-content")
                    .with_text("Borrow checker says hi"),
                time("09:15"),
            ],
        ));
        assert_eq!(label, "From Ferris. \nBorrow checker says hi \nTime: 09:15.");
    }

    #[test]
    fn test_forwarded_message() {
        let label = describe(message(
            "",
            vec![
                NodeSpec::new("div").with_class("message-title-wrapper").with_children([
                    NodeSpec::new("span").with_class("label").with_text("Forwarded from"),
                    NodeSpec::new("div").with_class("message-title").with_child(
                        NodeSpec::new("span").with_class("sender-title").with_text("Rust News"),
                    ),
                ]),
                NodeSpec::new("div").with_class("text-content").with_text("1.80 released"),
            ],
        ));
        assert_eq!(label, "Forwarded from Rust News. \n1.80 released");
    }

    #[test]
    fn test_own_message_with_delivery_status() {
        let label = describe(message(
            "own",
            vec![
                NodeSpec::new("div").with_class("text-content").with_text("On my way"),
                time("18:02"),
                NodeSpec::new("div")
                    .with_class("MessageOutgoingStatus")
                    .with_child(NodeSpec::new("i").with_class("icon icon-message-read")),
            ],
        ));
        assert_eq!(label, "Your message. \nOn my way \nTime: 18:02. Status: Read.");
    }

    #[test]
    fn test_file_message() {
        let label = describe(message(
            "",
            vec![NodeSpec::new("div").with_class("File").with_children([
                NodeSpec::new("div").with_class("file-title").with_text("report.pdf"),
                NodeSpec::new("div").with_class("file-subtitle").with_text("2.4 MB"),
            ])],
        ));
        assert_eq!(label, "File. \nFile name: report.pdf. \nFile size: 2.4 MB.");
    }

    #[test]
    fn test_album_counts_photos_and_videos() {
        let label = describe(message(
            "",
            vec![NodeSpec::new("div").with_class("Album").with_children([
                NodeSpec::new("div").with_class("media-inner"),
                NodeSpec::new("div").with_class("media-inner"),
                NodeSpec::new("div")
                    .with_class("media-inner")
                    .with_child(NodeSpec::new("video")),
            ])],
        ));
        assert_eq!(label, "Album with 3 items: 2 photos and 1 videos.");
    }

    #[test]
    fn test_sticker_and_reply() {
        let label = describe(message(
            "",
            vec![
                NodeSpec::new("div").with_class("message-subheader").with_child(
                    NodeSpec::new("div").with_class("EmbeddedMessage").with_children([
                        NodeSpec::new("span").with_class("embedded-sender").with_text("Ada"),
                        NodeSpec::new("div")
                            .with_class("embedded-text-wrapper")
                            .with_text("lunch?"),
                    ]),
                ),
                NodeSpec::new("div").with_class("sticker-image"),
                NodeSpec::new("img").with_class("emoji-small").with_attr("alt", "🍕"),
            ],
        ));
        assert_eq!(label, "Sticker: 🍕 \nIn reply to message from Ada: lunch?.");
    }

    #[test]
    fn test_voice_message() {
        let label = describe(message(
            "",
            vec![NodeSpec::new("div").with_class("message-content voice").with_child(
                NodeSpec::new("span").with_class("voice-duration").with_text("0:42"),
            )],
        ));
        assert_eq!(label, "Voice message. Duration: 0:42.");
    }
}
