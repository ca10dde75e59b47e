//! Accessible replacement for native context menus.
//!
//! The host's own menu is opened by replaying a secondary action, read after
//! a short delay, dismissed through its backdrop and mirrored into a modal
//! dialog of plain buttons. Activating a button replays activation on the
//! native item it was built from.

use std::time::{Duration, Instant};

use annotator_core::{HostTree, NodeId, Result, Selector, SYNTHETIC_ATTR};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::timer::TimerSlot;

pub const MENU_OVERLAY_ID: &str = "accessible-context-menu";

/// Replays user input on host nodes.
pub trait InputReplayer: Send {
    /// Open the node's context menu.
    fn secondary_action(&mut self, tree: &dyn HostTree, node: NodeId);

    /// Click the node.
    fn activate(&mut self, tree: &dyn HostTree, node: NodeId);
}

/// Replayer for hosts that do not need input forwarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReplayer;

impl InputReplayer for NoopReplayer {
    fn secondary_action(&mut self, _tree: &dyn HostTree, _node: NodeId) {}

    fn activate(&mut self, _tree: &dyn HostTree, _node: NodeId) {}
}

/// Where to find a native menu and what to call it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuSource {
    pub title: String,
    /// Native menu items, read as the host renders them.
    #[serde(default)]
    pub items: Option<Selector>,
    /// Fixed entries bound to host controls, listed before native items.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controls: Vec<ControlItem>,
    /// Items are looked up under the first match only. Without a match the
    /// menu is not opened.
    #[serde(default)]
    pub scope: Option<Selector>,
    #[serde(default)]
    pub backdrop: Option<Selector>,
    /// Overrides the configured delay before the menu is read.
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl MenuSource {
    /// A menu read from native items matching `items`.
    pub fn native(title: impl Into<String>, items: Selector) -> Self {
        Self {
            title: title.into(),
            items: Some(items),
            controls: Vec::new(),
            scope: None,
            backdrop: None,
            delay_ms: None,
        }
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.map(Duration::from_millis)
    }
}

/// A menu entry that presses a host control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlItem {
    /// `{text}` expands to the control's own text, or `fallback_text` when
    /// the control has none.
    pub label: String,
    pub control: Selector,
    #[serde(default)]
    pub fallback_text: Option<String>,
    /// While the control carries this class the entry reads `toggled_label`.
    #[serde(default)]
    pub toggled_class: Option<String>,
    #[serde(default)]
    pub toggled_label: Option<String>,
    #[serde(default)]
    pub destructive: bool,
    /// Activation refreshes the menu instead of closing it.
    #[serde(default)]
    pub keep_open: bool,
}

impl ControlItem {
    pub fn new(label: impl Into<String>, control: Selector) -> Self {
        Self {
            label: label.into(),
            control,
            fallback_text: None,
            toggled_class: None,
            toggled_label: None,
            destructive: false,
            keep_open: false,
        }
    }

    pub fn keep_open(mut self) -> Self {
        self.keep_open = true;
        self
    }

    pub fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }

    pub fn toggled(mut self, class: impl Into<String>, label: impl Into<String>) -> Self {
        self.toggled_class = Some(class.into());
        self.toggled_label = Some(label.into());
        self
    }

    pub fn fallback_text(mut self, text: impl Into<String>) -> Self {
        self.fallback_text = Some(text.into());
        self
    }

    fn describe(&self, tree: &dyn HostTree, scope: NodeId) -> MenuItemDescriptor {
        let control = self
            .control
            .query(tree, scope)
            .filter(|node| !tree.within_synthetic(*node));

        let toggled = match (control, &self.toggled_class) {
            (Some(node), Some(class)) => tree.has_class(node, class),
            _ => false,
        };
        let template = match (&self.toggled_label, toggled) {
            (Some(label), true) => label.as_str(),
            _ => self.label.as_str(),
        };
        let label = if template.contains("{text}") {
            let own = control
                .map(|node| annotator_core::normalize_whitespace(&tree.text_content(node)))
                .unwrap_or_default();
            let text = if own.is_empty() {
                self.fallback_text.clone().unwrap_or_default()
            } else {
                own
            };
            template.replace("{text}", &text)
        } else {
            template.to_string()
        };

        MenuItemDescriptor {
            label,
            destructive: self.destructive,
            enabled: control.is_some_and(|node| is_enabled(tree, node)),
            keep_open: self.keep_open,
            native: control,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItemDescriptor {
    pub label: String,
    pub destructive: bool,
    pub enabled: bool,
    pub keep_open: bool,
    /// The host node activation is replayed on; `None` for a missing control.
    pub native: Option<NodeId>,
}

fn is_enabled(tree: &dyn HostTree, node: NodeId) -> bool {
    !tree.has_class(node, "disabled") && tree.attribute(node, "aria-disabled") != Some("true")
}

/// Read the menu entries under `scope`: control entries first, then native
/// items, skipping unlabeled ones. Empty when the source's own scope is absent.
pub fn collect_menu_items(
    tree: &dyn HostTree,
    scope: NodeId,
    source: &MenuSource,
) -> Vec<MenuItemDescriptor> {
    let scope = match &source.scope {
        Some(selector) => match selector.query(tree, scope) {
            Some(node) => node,
            None => return Vec::new(),
        },
        None => scope,
    };

    let mut items: Vec<_> = source
        .controls
        .iter()
        .map(|control| control.describe(tree, scope))
        .collect();

    if let Some(selector) = &source.items {
        items.extend(
            selector
                .query_all(tree, scope)
                .into_iter()
                .filter(|node| !tree.within_synthetic(*node))
                .filter_map(|node| {
                    let label = annotator_core::normalize_whitespace(&tree.text_content(node));
                    if label.is_empty() {
                        return None;
                    }
                    Some(MenuItemDescriptor {
                        label,
                        destructive: tree.has_class(node, "destructive"),
                        enabled: is_enabled(tree, node),
                        keep_open: false,
                        native: Some(node),
                    })
                }),
        );
    }
    items
}

/// An open accessible menu overlay.
#[derive(Debug)]
pub struct AccessibleMenu {
    title: String,
    overlay: NodeId,
    buttons: Vec<NodeId>,
    cancel: NodeId,
    items: Vec<MenuItemDescriptor>,
}

impl AccessibleMenu {
    pub fn open(
        tree: &mut dyn HostTree,
        title: &str,
        items: Vec<MenuItemDescriptor>,
    ) -> Result<Self> {
        let overlay = tree.create_element("div");
        tree.set_attribute(overlay, SYNTHETIC_ATTR, "menu")?;
        tree.set_attribute(overlay, "id", MENU_OVERLAY_ID)?;

        let dialog = tree.create_element("div");
        tree.set_attribute(dialog, "role", "dialog")?;
        tree.set_attribute(dialog, "aria-modal", "true")?;
        tree.set_attribute(dialog, "aria-label", title)?;
        tree.insert_child(overlay, dialog, None)?;

        let heading = tree.create_element("h2");
        tree.set_text_content(heading, title)?;
        tree.insert_child(dialog, heading, None)?;

        let list = tree.create_element("ul");
        tree.insert_child(dialog, list, None)?;

        let mut buttons = Vec::with_capacity(items.len());
        for item in &items {
            let entry = tree.create_element("li");
            let button = tree.create_element("button");
            tree.set_text_content(button, &item.label)?;
            if item.destructive {
                tree.set_attribute(button, "class", "destructive")?;
            }
            if !item.enabled {
                tree.set_attribute(button, "aria-disabled", "true")?;
            }
            tree.insert_child(entry, button, None)?;
            tree.insert_child(list, entry, None)?;
            buttons.push(button);
        }

        let cancel = tree.create_element("button");
        tree.set_text_content(cancel, "Cancel")?;
        tree.insert_child(dialog, cancel, None)?;

        let document = tree.document();
        tree.insert_child(document, overlay, None)?;
        debug!(title, items = items.len(), "accessible menu opened");

        Ok(Self {
            title: title.to_string(),
            overlay,
            buttons,
            cancel,
            items,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn overlay(&self) -> NodeId {
        self.overlay
    }

    pub fn buttons(&self) -> &[NodeId] {
        &self.buttons
    }

    pub fn cancel_button(&self) -> NodeId {
        self.cancel
    }

    pub fn items(&self) -> &[MenuItemDescriptor] {
        &self.items
    }

    /// Remove the overlay, leaving nothing of it in the document.
    pub fn dismiss(self, tree: &mut dyn HostTree) -> Result<()> {
        if tree.contains(self.overlay) && tree.parent(self.overlay).is_some() {
            tree.detach(self.overlay)?;
        }
        debug!(title = %self.title, "accessible menu dismissed");
        Ok(())
    }
}

/// A menu read scheduled after replayed input.
#[derive(Debug, Clone)]
pub(crate) struct MenuRequest {
    pub(crate) source: MenuSource,
    /// Re-reading a menu that is already open.
    pub(crate) refresh: bool,
}

/// Delay between replaying input and reading the menu it opens.
#[derive(Debug)]
pub(crate) struct MenuProbe {
    delay: Duration,
    timer: TimerSlot,
    request: Option<MenuRequest>,
}

impl MenuProbe {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            timer: TimerSlot::new(),
            request: None,
        }
    }

    pub(crate) fn request(&mut self, source: MenuSource, now: Instant) {
        self.schedule(source, false, now);
    }

    pub(crate) fn refresh(&mut self, source: MenuSource, now: Instant) {
        self.schedule(source, true, now);
    }

    fn schedule(&mut self, source: MenuSource, refresh: bool, now: Instant) {
        let delay = source.delay().unwrap_or(self.delay);
        self.request = Some(MenuRequest { source, refresh });
        self.timer.arm(now + delay);
    }

    pub(crate) fn cancel(&mut self) {
        self.timer.cancel();
        self.request = None;
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    pub(crate) fn poll(&mut self, now: Instant) -> Option<MenuRequest> {
        if self.timer.take_due(now) {
            self.request.take()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annotator_core::{MemoryTree, NodeSpec};

    fn native_menu() -> MemoryTree {
        MemoryTree::from_specs(&[NodeSpec::new("div")
            .with_class("ContextMenuContainer")
            .with_children([
                NodeSpec::new("div").with_class("MenuItem").with_text("Reply"),
                NodeSpec::new("div")
                    .with_class("MenuItem disabled")
                    .with_text("Pin"),
                NodeSpec::new("div").with_class("MenuItem").with_text("  "),
                NodeSpec::new("div")
                    .with_class("MenuItem destructive")
                    .with_text("Delete"),
            ])])
        .unwrap()
    }

    fn source() -> MenuSource {
        MenuSource::native(
            "Message Actions",
            Selector::parse(".ContextMenuContainer .MenuItem").unwrap(),
        )
    }

    #[test]
    fn test_collect_menu_items() {
        let tree = native_menu();
        let items = collect_menu_items(&tree, tree.document(), &source());
        let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["Reply", "Pin", "Delete"]);
        assert!(!items[1].enabled);
        assert!(items[2].destructive);
    }

    #[test]
    fn test_open_and_dismiss_leave_no_residue() {
        let mut tree = native_menu();
        let before = tree.children(tree.document());
        let items = collect_menu_items(&tree, tree.document(), &source());
        let menu = AccessibleMenu::open(&mut tree, "Message Actions", items).unwrap();

        let overlay = tree.find("#accessible-context-menu").unwrap().unwrap();
        assert_eq!(overlay, menu.overlay());
        let dialog = tree.find("[role=\"dialog\"]").unwrap().unwrap();
        assert_eq!(tree.attribute(dialog, "aria-label"), Some("Message Actions"));
        assert_eq!(menu.buttons().len(), 3);
        assert_eq!(tree.text_content(menu.cancel_button()), "Cancel");
        assert_eq!(
            tree.attribute(menu.buttons()[1], "aria-disabled"),
            Some("true")
        );

        menu.dismiss(&mut tree).unwrap();
        assert_eq!(tree.children(tree.document()), before);
        assert!(tree.find("#accessible-context-menu").unwrap().is_none());
    }

    #[test]
    fn test_menu_read_fires_once() {
        let start = Instant::now();
        let mut probe = MenuProbe::new(Duration::from_millis(50));
        probe.request(source(), start);
        assert!(probe.poll(start + Duration::from_millis(49)).is_none());
        assert!(probe.poll(start + Duration::from_millis(50)).is_some());
        assert!(probe.poll(start + Duration::from_millis(100)).is_none());
    }

    fn player() -> MemoryTree {
        MemoryTree::from_specs(&[NodeSpec::new("div").with_class("AudioPlayer").with_children([
            NodeSpec::new("button").with_class("toggle-play pause"),
            NodeSpec::new("button")
                .with_class("player-button disabled")
                .with_attr("aria-label", "Previous track"),
            NodeSpec::new("button").with_class("playback-button").with_text(" 1.5X "),
        ])])
        .unwrap()
    }

    fn player_source() -> MenuSource {
        let sel = |s: &str| Selector::parse(s).unwrap();
        MenuSource {
            title: "Player Controls".to_string(),
            items: None,
            controls: vec![
                ControlItem::new("Play", sel(".toggle-play"))
                    .toggled("pause", "Pause")
                    .keep_open(),
                ControlItem::new("Previous Track", sel(".player-button[aria-label=\"Previous track\"]"))
                    .keep_open(),
                ControlItem::new("Playback Rate ({text})", sel(".playback-button"))
                    .fallback_text("1X")
                    .keep_open(),
                ControlItem::new("Close Player", sel(".player-close")).destructive(),
            ],
            scope: Some(sel(".AudioPlayer")),
            backdrop: None,
            delay_ms: Some(150),
        }
    }

    #[test]
    fn test_control_items_follow_host_state() {
        let mut tree = player();
        let items = collect_menu_items(&tree, tree.document(), &player_source());
        let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Pause", "Previous Track", "Playback Rate (1.5X)", "Close Player"]
        );
        assert!(items[0].enabled && items[0].keep_open);
        assert!(!items[1].enabled);
        assert!(items[3].destructive && !items[3].keep_open);
        assert_eq!(items[3].native, None);
        assert!(!items[3].enabled);

        let play = items[0].native.unwrap();
        tree.set_attribute(play, "class", "toggle-play").unwrap();
        let rate = items[2].native.unwrap();
        tree.set_text_content(rate, "").unwrap();
        let items = collect_menu_items(&tree, tree.document(), &player_source());
        assert_eq!(items[0].label, "Play");
        assert_eq!(items[2].label, "Playback Rate (1X)");
    }

    #[test]
    fn test_missing_scope_yields_no_items() {
        let tree = native_menu();
        assert!(collect_menu_items(&tree, tree.document(), &player_source()).is_empty());
    }

    #[test]
    fn test_source_delay_overrides_default_delay() {
        let start = Instant::now();
        let mut probe = MenuProbe::new(Duration::from_millis(50));
        probe.refresh(player_source(), start);
        assert!(probe.poll(start + Duration::from_millis(50)).is_none());
        let request = probe.poll(start + Duration::from_millis(150)).unwrap();
        assert!(request.refresh);
        assert_eq!(request.source.title, "Player Controls");
    }
}
