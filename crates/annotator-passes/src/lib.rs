//! Annotation passes for a chat web client.
//!
//! Each pass owns the selectors for one part of the client and writes only
//! `aria-*`, `role` and `tabindex` attributes or synthetic nodes, so the
//! engine never mistakes its output for host changes.

pub mod chat_list;
pub mod chat_status;
pub mod cleanup;
pub mod confirm_dialog;
pub mod forward_picker;
pub mod messages;
pub mod search_results;
pub mod settings;
pub mod text;
pub mod unread_divider;

pub use chat_list::ChatListPass;
pub use chat_status::ChatStatusPass;
pub use cleanup::{CleanupPass, HideInvisiblePass};
pub use confirm_dialog::ConfirmDialogPass;
pub use forward_picker::ForwardPickerPass;
pub use messages::MessagesPass;
pub use search_results::SearchResultsPass;
pub use settings::SettingsPass;
pub use unread_divider::UnreadDividerPass;

use annotator_core::{HostTree, NodeId, Result, Selector};
use annotator_engine::{AnnotationPass, ControlItem, MenuSource, PassRegistry};

/// Every pass, in registration order.
pub fn standard_passes() -> Result<Vec<Box<dyn AnnotationPass>>> {
    Ok(vec![
        Box::new(ChatStatusPass::new()?),
        Box::new(ChatListPass::new()?),
        Box::new(MessagesPass::new()?),
        Box::new(UnreadDividerPass::new()?),
        Box::new(ConfirmDialogPass::new()?),
        Box::new(ForwardPickerPass::new()?),
        Box::new(SearchResultsPass::new()?),
        Box::new(SettingsPass::new()?),
        Box::new(CleanupPass::new()?),
        Box::new(HideInvisiblePass::new()?),
    ])
}

/// A registry holding [`standard_passes`], not yet sealed.
pub fn standard_registry() -> Result<PassRegistry> {
    let mut registry = PassRegistry::new();
    registry.register_all(standard_passes()?)?;
    Ok(registry)
}

/// The context menu opened on a message.
pub fn message_menu() -> Result<MenuSource> {
    Ok(MenuSource {
        backdrop: Some(Selector::parse(".Menu.in-portal .backdrop")?),
        ..MenuSource::native("Message Actions", Selector::parse(".ContextMenuContainer .MenuItem")?)
    })
}

/// The context menu opened on a chat list entry.
pub fn chat_menu() -> Result<MenuSource> {
    Ok(MenuSource {
        backdrop: Some(Selector::parse(".Menu.in-portal .backdrop")?),
        ..MenuSource::native("Chat Actions", Selector::parse(".ListItem-context-menu .MenuItem")?)
    })
}

/// Delay before the player is read after one of its controls is pressed.
const PLAYER_REFRESH_MS: u64 = 150;

/// Controls of the floating audio player. Everything but closing keeps the
/// menu open and re-reads it, so labels follow the player's state.
pub fn audio_player_menu() -> Result<MenuSource> {
    let track = |label: &str| -> Result<Selector> {
        Selector::parse(&format!(".player-button[aria-label=\"{label}\"]"))
    };
    Ok(MenuSource {
        title: "Player Controls".to_string(),
        items: None,
        controls: vec![
            ControlItem::new("Play", Selector::parse(".toggle-play")?)
                .toggled("pause", "Pause")
                .keep_open(),
            ControlItem::new("Previous Track", track("Previous track")?).keep_open(),
            ControlItem::new("Next Track", track("Next track")?).keep_open(),
            ControlItem::new("Playback Rate ({text})", Selector::parse(".playback-button")?)
                .fallback_text("1X")
                .keep_open(),
            ControlItem::new("Close Player", Selector::parse(".player-close")?).destructive(),
        ],
        scope: Some(Selector::parse(".AudioPlayer")?),
        backdrop: None,
        delay_ms: Some(PLAYER_REFRESH_MS),
    })
}

/// The play button of a voice or music message. Pressing it starts playback
/// and brings up the player.
pub fn audio_play_button(tree: &dyn HostTree, message: NodeId) -> Result<Option<NodeId>> {
    let audio = Selector::parse(".message-content.voice, .Audio.inline")?;
    if audio.query(tree, message).is_none() {
        return Ok(None);
    }
    Ok(Selector::parse(".Button.toggle-play")?.query(tree, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_seals() {
        let mut registry = standard_registry().unwrap();
        registry.seal().unwrap();
        assert_eq!(registry.len(), 10);

        let order: Vec<_> = registry
            .order()
            .iter()
            .map(|id| registry.name(*id).unwrap())
            .collect();
        let position = |name: &str| order.iter().position(|n| *n == name).unwrap();
        assert!(position("messages") < position("unread-divider"));
        assert_eq!(order[0], "chat-status");
    }

    #[test]
    fn test_menu_sources_parse() {
        assert_eq!(message_menu().unwrap().title, "Message Actions");
        assert_eq!(
            chat_menu().unwrap().items.unwrap().as_str(),
            ".ListItem-context-menu .MenuItem"
        );

        let player = audio_player_menu().unwrap();
        assert_eq!(player.controls.len(), 5);
        assert_eq!(player.delay_ms, Some(150));
        assert!(player.controls.iter().take(4).all(|c| c.keep_open));
        assert!(player.controls[4].destructive && !player.controls[4].keep_open);
    }

    #[test]
    fn test_audio_play_button_only_for_audio_messages() {
        use annotator_core::{MemoryTree, NodeSpec};

        let play = || NodeSpec::new("button").with_class("Button toggle-play");
        let tree = MemoryTree::from_specs(&[
            NodeSpec::new("div").with_id("voice").with_class("Message").with_children([
                NodeSpec::new("div").with_class("message-content voice"),
                play(),
            ]),
            NodeSpec::new("div").with_id("text").with_class("Message").with_child(play()),
        ])
        .unwrap();

        let voice = tree.find("#voice").unwrap().unwrap();
        let button = audio_play_button(&tree, voice).unwrap().unwrap();
        assert!(tree.has_class(button, "toggle-play"));
        let text = tree.find("#text").unwrap().unwrap();
        assert_eq!(audio_play_button(&tree, text).unwrap(), None);
    }
}
