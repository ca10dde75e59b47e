//! Recorded client sessions and their replay through the engine.
//!
//! A scenario is a starting document plus timed host mutations and user
//! gestures. Replay runs on a virtual clock, so a session spanning minutes
//! finishes instantly and produces the same timeline every time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use annotator_core::{AnnotatorConfig, HostTree, MemoryTree, NodeId, NodeSpec, Selector};
use annotator_engine::{
    EnginePhase, EngineStats, InputReplayer, MenuSource, Priority, ReactiveEngine,
};
use annotator_passes::{
    audio_play_button, audio_player_menu, chat_menu, message_menu, standard_registry,
};
use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// How long replay keeps running after the last step when the scenario does
/// not say.
const DEFAULT_TAIL_MS: u64 = 5_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,

    pub document: Vec<NodeSpec>,

    #[serde(default)]
    pub steps: Vec<Step>,

    /// Virtual time to stop at, in milliseconds from the start.
    #[serde(default)]
    pub until_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Host inserts a subtree.
    Append { parent: Selector, node: NodeSpec },
    /// Host removes a node.
    Remove { target: Selector },
    SetAttribute {
        target: Selector,
        name: String,
        value: String,
    },
    RemoveAttribute { target: Selector, name: String },
    SetText { target: Selector, text: String },
    /// User long-presses or right-clicks a node.
    SecondaryAction { target: Selector, menu: MenuKind },
    /// User opens a voice or music message, which starts playback and
    /// brings up the player controls.
    PlayAudio { target: Selector },
    /// User picks an entry in the accessible menu.
    ActivateMenuItem { index: usize },
    DismissMenu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuKind {
    Message,
    Chat,
    Player,
}

impl MenuKind {
    fn source(self) -> annotator_core::Result<MenuSource> {
        match self {
            MenuKind::Message => message_menu(),
            MenuKind::Chat => chat_menu(),
            MenuKind::Player => audio_player_menu(),
        }
    }
}

impl Scenario {
    pub fn from_json(source: &str) -> Result<Self> {
        serde_json::from_str(source).context("Invalid scenario")
    }

    fn end_ms(&self) -> u64 {
        self.until_ms.unwrap_or_else(|| {
            self.steps.iter().map(|step| step.at_ms).max().unwrap_or(0) + DEFAULT_TAIL_MS
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SpokenEntry {
    pub at_ms: u64,
    pub priority: Priority,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GestureEntry {
    pub gesture: String,
    pub node: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub name: Option<String>,
    pub end_ms: u64,
    pub phase: EnginePhase,
    pub spoken: Vec<SpokenEntry>,
    pub gestures: Vec<GestureEntry>,
    pub stats: EngineStats,
}

/// Forwards gestures nowhere; records them for the report.
#[derive(Clone, Default)]
pub struct RecordingReplayer {
    log: Arc<Mutex<Vec<GestureEntry>>>,
}

impl RecordingReplayer {
    fn record(&self, gesture: &str, tree: &dyn HostTree, node: NodeId) {
        let node = describe_node(tree, node);
        info!(gesture, %node, "input replayed");
        self.log.lock().push(GestureEntry {
            gesture: gesture.to_string(),
            node,
        });
    }

    fn take(&self) -> Vec<GestureEntry> {
        std::mem::take(&mut *self.log.lock())
    }
}

impl InputReplayer for RecordingReplayer {
    fn secondary_action(&mut self, tree: &dyn HostTree, node: NodeId) {
        self.record("secondary_action", tree, node);
    }

    fn activate(&mut self, tree: &dyn HostTree, node: NodeId) {
        self.record("activate", tree, node);
    }
}

/// `tag#id.class` for log lines.
fn describe_node(tree: &dyn HostTree, node: NodeId) -> String {
    let mut out = tree.tag_name(node).unwrap_or("#text").to_string();
    if let Some(id) = tree.attribute(node, "id") {
        out.push('#');
        out.push_str(id);
    }
    if let Some(class) = tree.attribute(node, "class") {
        for class in class.split_whitespace() {
            out.push('.');
            out.push_str(class);
        }
    }
    out
}

fn resolve(tree: &MemoryTree, selector: &Selector) -> Result<NodeId> {
    selector
        .query(tree, tree.document())
        .ok_or_else(|| anyhow!("no node matches `{selector}`"))
}

pub fn replay(scenario: &Scenario, config: &AnnotatorConfig) -> Result<ReplayReport> {
    let mut tree =
        MemoryTree::from_specs(&scenario.document).context("Failed to build scenario document")?;
    let replayer = RecordingReplayer::default();
    let mut engine = ReactiveEngine::new(config, standard_registry()?)
        .context("Failed to initialize engine")?
        .with_replayer(Box::new(replayer.clone()));
    let mut spoken_rx = engine.subscribe();

    let t0 = Instant::now();
    let at = |ms: u64| t0 + Duration::from_millis(ms);
    engine.start(&mut tree, t0)?;

    let mut steps = scenario.steps.clone();
    steps.sort_by_key(|step| step.at_ms);
    for (number, step) in steps.iter().enumerate() {
        let now = at(step.at_ms);
        engine.run_until(&mut tree, now)?;
        apply(&mut engine, &mut tree, &step.action, now)
            .with_context(|| format!("Step {} at {}ms failed", number + 1, step.at_ms))?;
        engine.pump(&mut tree, now)?;
    }

    let end_ms = scenario.end_ms();
    engine.run_until(&mut tree, at(end_ms))?;
    debug!(stats = ?engine.stats(), "replay finished");

    let mut spoken = Vec::new();
    while let Ok(entry) = spoken_rx.try_recv() {
        spoken.push(SpokenEntry {
            at_ms: entry.at.duration_since(t0).as_millis() as u64,
            priority: entry.priority,
            text: entry.text,
        });
    }

    Ok(ReplayReport {
        name: scenario.name.clone(),
        end_ms,
        phase: engine.phase(),
        spoken,
        gestures: replayer.take(),
        stats: engine.stats().clone(),
    })
}

fn apply(
    engine: &mut ReactiveEngine,
    tree: &mut MemoryTree,
    action: &Action,
    now: Instant,
) -> Result<()> {
    match action {
        Action::Append { parent, node } => {
            let parent = resolve(tree, parent)?;
            tree.append_spec(parent, node)?;
        }
        Action::Remove { target } => {
            let target = resolve(tree, target)?;
            tree.detach(target)?;
        }
        Action::SetAttribute {
            target,
            name,
            value,
        } => {
            let target = resolve(tree, target)?;
            tree.set_attribute(target, name, value)?;
        }
        Action::RemoveAttribute { target, name } => {
            let target = resolve(tree, target)?;
            tree.remove_attribute(target, name)?;
        }
        Action::SetText { target, text } => {
            let target = resolve(tree, target)?;
            tree.set_text_content(target, text)?;
        }
        Action::SecondaryAction { target, menu } => {
            let target = resolve(tree, target)?;
            engine.secondary_action(tree, target, menu.source()?, now)?;
        }
        Action::PlayAudio { target } => {
            let message = resolve(tree, target)?;
            let Some(button) = audio_play_button(tree, message)? else {
                bail!("`{target}` is not an audio message");
            };
            engine.primary_action(tree, button, MenuKind::Player.source()?, now)?;
        }
        Action::ActivateMenuItem { index } => {
            if !engine.activate_menu_item(tree, *index, now)? {
                bail!("menu item {index} could not be activated");
            }
        }
        Action::DismissMenu => {
            engine.dismiss_menu(tree)?;
        }
    }
    Ok(())
}
