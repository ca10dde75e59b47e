use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use annotator_core::{
    AnnotatorConfig, AnnotatorError, HostTree, MemoryTree, NodeId, NodeSpec, Result, Selector,
};
use annotator_engine::{
    AnnotationPass, ControlItem, EngineCommand, EnginePhase, EngineRuntime, InputReplayer, MenuSource,
    PassContext, PassRegistry, ReactiveEngine, Region, SharedTree,
};
use parking_lot::Mutex;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn sel(source: &str) -> Selector {
    Selector::parse(source).unwrap()
}

fn message(id: &str, text: &str) -> NodeSpec {
    NodeSpec::new("div")
        .with_class("Message")
        .with_attr("id", id)
        .with_child(NodeSpec::new("div").with_class("text-content").with_text(text))
}

fn document(messages: usize) -> NodeSpec {
    NodeSpec::new("div").with_id("root").with_children([
        NodeSpec::new("div").with_id("LeftColumn"),
        NodeSpec::new("div")
            .with_class("MessageList")
            .with_children((0..messages).map(|i| message(&format!("m{i}"), &format!("hello {i}")))),
    ])
}

fn tree_with(messages: usize) -> MemoryTree {
    MemoryTree::from_specs(&[document(messages)]).unwrap()
}

/// Counts runs; writes nothing.
struct Counting {
    name: &'static str,
    region: &'static str,
    after: Vec<&'static str>,
    runs: Arc<AtomicUsize>,
    log: Option<Arc<Mutex<Vec<String>>>>,
}

impl AnnotationPass for Counting {
    fn name(&self) -> &str {
        self.name
    }

    fn region(&self) -> Region {
        Region::new(self.name, sel(self.region))
    }

    fn after(&self) -> &[&str] {
        &self.after
    }

    fn run(&mut self, _ctx: &mut PassContext<'_>, _root: NodeId) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().push(self.name.to_string());
        }
        Ok(())
    }
}

fn counting(name: &'static str, region: &'static str, runs: Arc<AtomicUsize>) -> Box<dyn AnnotationPass> {
    Box::new(Counting {
        name,
        region,
        after: Vec::new(),
        runs,
        log: None,
    })
}

/// Labels every message and injects a heading overlay into it.
struct Labels;

impl AnnotationPass for Labels {
    fn name(&self) -> &str {
        "labels"
    }

    fn region(&self) -> Region {
        Region::new("message-list", sel(".MessageList"))
    }

    fn run(&mut self, ctx: &mut PassContext<'_>, root: NodeId) -> Result<()> {
        for message in sel(".Message").query_all(ctx.tree(), root) {
            let text = ctx.tree().text_content(message);
            ctx.annotate(message, |ctx| {
                ctx.set_attribute(message, "aria-label", &text)?;
                let overlay = ctx.inject(message, "div", None)?;
                ctx.set_attribute(overlay, "role", "heading")?;
                ctx.set_text(overlay, &text)?;
                Ok(())
            })?;
        }
        Ok(())
    }
}

/// Announces the newest message once.
struct Newest {
    last: Option<NodeId>,
}

impl AnnotationPass for Newest {
    fn name(&self) -> &str {
        "newest"
    }

    fn region(&self) -> Region {
        Region::new("message-list", sel(".MessageList"))
    }

    fn run(&mut self, ctx: &mut PassContext<'_>, root: NodeId) -> Result<()> {
        let Some(newest) = sel(".Message").query_all(ctx.tree(), root).last().copied() else {
            return Ok(());
        };
        if self.last == Some(newest) {
            return Ok(());
        }
        self.last = Some(newest);
        let text = ctx.tree().text_content(newest);
        ctx.announce_transient(&text)?;
        Ok(())
    }
}

struct Failing;

impl AnnotationPass for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    fn region(&self) -> Region {
        Region::new("message-list", sel(".MessageList"))
    }

    fn run(&mut self, _ctx: &mut PassContext<'_>, _root: NodeId) -> Result<()> {
        Err(AnnotatorError::MissingElement(".never".to_string()))
    }
}

struct Panicking;

impl AnnotationPass for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    fn region(&self) -> Region {
        Region::new("message-list", sel(".MessageList"))
    }

    fn run(&mut self, _ctx: &mut PassContext<'_>, _root: NodeId) -> Result<()> {
        panic!("pass exploded");
    }
}

/// Injects an overlay into each message, then fails the first attempt.
struct Flaky {
    attempts: Arc<AtomicUsize>,
}

impl AnnotationPass for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn region(&self) -> Region {
        Region::new("message-list", sel(".MessageList"))
    }

    fn run(&mut self, ctx: &mut PassContext<'_>, root: NodeId) -> Result<()> {
        for message in sel(".Message").query_all(ctx.tree(), root) {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            ctx.annotate(message, |ctx| {
                let overlay = ctx.inject(message, "div", None)?;
                ctx.set_attribute(overlay, "role", "note")?;
                if attempt == 0 {
                    return Err(AnnotatorError::pass_failed("flaky", "sender not rendered yet"));
                }
                ctx.set_attribute(message, "aria-label", "annotated")?;
                Ok(())
            })?;
        }
        Ok(())
    }
}

fn engine_with(config: &AnnotatorConfig, passes: Vec<Box<dyn AnnotationPass>>) -> ReactiveEngine {
    let mut registry = PassRegistry::new();
    registry.register_all(passes).unwrap();
    ReactiveEngine::new(config, registry).unwrap()
}

fn touch_message(tree: &mut MemoryTree, value: &str) {
    let message = tree.find(".Message").unwrap().unwrap();
    tree.set_attribute(message, "data-edited", value).unwrap();
}

#[test]
fn test_root_is_acquired_by_retry() {
    let t0 = Instant::now();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut tree = MemoryTree::new();
    let mut engine = engine_with(
        &AnnotatorConfig::default(),
        vec![counting("messages", ".MessageList", runs.clone())],
    );

    assert_eq!(engine.start(&mut tree, t0).unwrap(), EnginePhase::AwaitingRoot);
    assert_eq!(engine.next_deadline(), Some(t0 + ms(500)));

    let document = tree.document();
    tree.append_spec(document, &document_spec()).unwrap();
    engine.pump(&mut tree, t0 + ms(200)).unwrap();
    engine.run_until(&mut tree, t0 + ms(499)).unwrap();
    assert_eq!(engine.phase(), EnginePhase::AwaitingRoot);

    engine.run_until(&mut tree, t0 + ms(500)).unwrap();
    assert_eq!(engine.phase(), EnginePhase::Observing);
    assert_eq!(engine.stats().root_probes, 2);
    // Initial replay over existing content, and no batch from pre-attach records.
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(engine.next_deadline(), None);
}

fn document_spec() -> NodeSpec {
    document(2)
}

#[test]
fn test_burst_runs_one_batch_after_quiet_window() {
    let t0 = Instant::now();
    let runs = Arc::new(AtomicUsize::new(0));
    let left = Arc::new(AtomicUsize::new(0));
    let mut tree = tree_with(3);
    let mut engine = engine_with(
        &AnnotatorConfig::default(),
        vec![
            counting("messages", ".MessageList", runs.clone()),
            counting("chats", "#LeftColumn", left.clone()),
        ],
    );
    engine.start(&mut tree, t0).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    for step in 0..5u64 {
        touch_message(&mut tree, &step.to_string());
        engine.pump(&mut tree, t0 + ms(step * 50)).unwrap();
    }
    engine.run_until(&mut tree, t0 + ms(449)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    engine.run_until(&mut tree, t0 + ms(450)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(left.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stats().batches, 1);
}

#[test]
fn test_self_writes_do_not_reschedule() {
    let t0 = Instant::now();
    let mut tree = tree_with(2);
    let mut engine = engine_with(&AnnotatorConfig::default(), vec![Box::new(Labels)]);
    engine.start(&mut tree, t0).unwrap();

    let messages = tree.find_all(".Message").unwrap();
    assert_eq!(tree.attribute(messages[0], "aria-label"), Some("hello 0"));
    assert!(engine.pending_passes().is_empty());
    assert_eq!(engine.next_deadline(), None);

    // A new host message triggers exactly one batch, which labels only it.
    let list = tree.find(".MessageList").unwrap().unwrap();
    tree.append_spec(list, &message("m9", "late")).unwrap();
    engine.pump(&mut tree, t0 + ms(1000)).unwrap();
    engine.run_until(&mut tree, t0 + ms(5000)).unwrap();

    assert_eq!(engine.stats().batches, 1);
    let overlays = tree.find_all("[role=\"heading\"]").unwrap();
    assert_eq!(overlays.len(), 3);
    let late = tree.find("#m9").unwrap().unwrap();
    assert_eq!(tree.attribute(late, "aria-label"), Some("late"));
    assert_eq!(engine.next_deadline(), None);
}

#[test]
fn test_replay_suppresses_transient_announcements() {
    let t0 = Instant::now();
    let mut tree = tree_with(2);
    let mut engine = engine_with(
        &AnnotatorConfig::default(),
        vec![Box::new(Newest { last: None })],
    );
    let mut rx = engine.subscribe();
    engine.start(&mut tree, t0).unwrap();
    assert_eq!(engine.channel().current(), "");
    assert!(rx.try_recv().is_err());

    let list = tree.find(".MessageList").unwrap().unwrap();
    tree.append_spec(list, &message("m2", "fresh news")).unwrap();
    engine.pump(&mut tree, t0 + ms(100)).unwrap();
    engine.run_until(&mut tree, t0 + ms(350)).unwrap();

    let spoken = rx.try_recv().unwrap();
    assert_eq!(spoken.text, "fresh news");
    assert_eq!(spoken.at, t0 + ms(350));

    let region = engine.channel().region().unwrap();
    assert_eq!(tree.text_content(region), "fresh news");
    engine.run_until(&mut tree, t0 + ms(3350)).unwrap();
    assert_eq!(tree.text_content(region), "");
}

#[test]
fn test_failures_are_isolated() {
    let t0 = Instant::now();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut tree = tree_with(1);
    let mut engine = engine_with(
        &AnnotatorConfig::default(),
        vec![
            Box::new(Failing),
            Box::new(Panicking),
            counting("messages", ".MessageList", runs.clone()),
        ],
    );
    engine.start(&mut tree, t0).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stats().pass_failures, 2);

    touch_message(&mut tree, "x");
    engine.pump(&mut tree, t0 + ms(10)).unwrap();
    engine.run_until(&mut tree, t0 + ms(260)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(engine.stats().pass_failures, 4);
}

#[test]
fn test_failed_annotation_is_retried_without_leftovers() {
    let t0 = Instant::now();
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut tree = tree_with(0);
    let mut engine = engine_with(
        &AnnotatorConfig::default(),
        vec![Box::new(Flaky {
            attempts: attempts.clone(),
        })],
    );
    engine.start(&mut tree, t0).unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
    let flaky = engine.registry().id_of("flaky").unwrap();

    let list = tree.find(".MessageList").unwrap().unwrap();
    tree.append_spec(list, &message("m0", "hello")).unwrap();
    engine.pump(&mut tree, t0 + ms(10)).unwrap();
    engine.run_until(&mut tree, t0 + ms(260)).unwrap();

    let node = tree.find("#m0").unwrap().unwrap();
    assert_eq!(engine.stats().batches, 1);
    assert_eq!(engine.stats().pass_failures, 1);
    assert!(!engine.markers().is_marked(node, flaky));
    assert!(tree.find_all("[role=\"note\"]").unwrap().is_empty());
    assert_eq!(tree.attribute(node, "aria-label"), None);
    // Detaching the overlay is a self-write and schedules nothing.
    assert!(engine.pending_passes().is_empty());
    assert_eq!(engine.next_deadline(), None);

    touch_message(&mut tree, "again");
    engine.pump(&mut tree, t0 + ms(500)).unwrap();
    engine.run_until(&mut tree, t0 + ms(750)).unwrap();

    assert_eq!(engine.stats().batches, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(engine.markers().is_marked(node, flaky));
    assert_eq!(tree.find_all("[role=\"note\"]").unwrap().len(), 1);
    assert_eq!(tree.attribute(node, "aria-label"), Some("annotated"));
}

#[test]
fn test_batch_order_follows_constraints() {
    let t0 = Instant::now();
    let log = Arc::new(Mutex::new(Vec::new()));
    let runs = Arc::new(AtomicUsize::new(0));
    let pass = |name: &'static str, after: Vec<&'static str>| -> Box<dyn AnnotationPass> {
        Box::new(Counting {
            name,
            region: ".MessageList",
            after,
            runs: runs.clone(),
            log: Some(log.clone()),
        })
    };
    let mut tree = tree_with(1);
    let mut engine = engine_with(
        &AnnotatorConfig::default(),
        vec![
            pass("overlay", vec!["layout"]),
            pass("status", vec![]),
            pass("layout", vec![]),
        ],
    );
    engine.start(&mut tree, t0).unwrap();
    assert_eq!(*log.lock(), vec!["status", "layout", "overlay"]);
}

#[test]
fn test_markers_are_swept_after_removal() {
    let t0 = Instant::now();
    let mut config = AnnotatorConfig::default();
    config.engine.sweep_markers_every = 1;
    config.engine.mirror_markers = true;
    let mut tree = tree_with(2);
    let mut engine = engine_with(&config, vec![Box::new(Labels)]);
    engine.start(&mut tree, t0).unwrap();

    let first = tree.find("#m0").unwrap().unwrap();
    assert_eq!(tree.attribute(first, "data-a11y-labels"), Some("true"));
    assert_eq!(engine.markers().len(), 2);

    tree.detach(first).unwrap();
    tree.collect_garbage();
    engine.pump(&mut tree, t0 + ms(10)).unwrap();
    engine.run_until(&mut tree, t0 + ms(300)).unwrap();

    assert_eq!(engine.markers().len(), 1);
    assert_eq!(engine.stats().markers_swept, 1);
}

#[test]
fn test_root_replacement_is_reacquired() {
    let t0 = Instant::now();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut tree = tree_with(1);
    let mut engine = engine_with(
        &AnnotatorConfig::default(),
        vec![counting("messages", ".MessageList", runs.clone())],
    );
    engine.start(&mut tree, t0).unwrap();
    let old_root = engine.observed_root().unwrap();

    tree.detach(old_root).unwrap();
    let body = tree.document();
    tree.append_spec(body, &document(1)).unwrap();
    engine.pump(&mut tree, t0 + ms(100)).unwrap();

    assert_eq!(engine.phase(), EnginePhase::Observing);
    assert_ne!(engine.observed_root(), Some(old_root));
    assert_eq!(engine.stats().root_acquisitions, 2);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<String>>>);

impl InputReplayer for Recorder {
    fn secondary_action(&mut self, tree: &dyn HostTree, node: NodeId) {
        let id = tree.attribute(node, "id").unwrap_or("?").to_string();
        self.0.lock().push(format!("context:{id}"));
    }

    fn activate(&mut self, tree: &dyn HostTree, node: NodeId) {
        let label = tree.text_content(node);
        self.0.lock().push(format!("click:{label}"));
    }
}

fn message_menu() -> MenuSource {
    MenuSource {
        backdrop: Some(sel(".Menu.in-portal .backdrop")),
        ..MenuSource::native("Message Actions", sel(".ContextMenuContainer .MenuItem"))
    }
}

fn native_menu() -> NodeSpec {
    NodeSpec::new("div").with_class("Menu in-portal").with_children([
        NodeSpec::new("div").with_class("backdrop").with_text("backdrop"),
        NodeSpec::new("div").with_class("ContextMenuContainer").with_children([
            NodeSpec::new("div").with_class("MenuItem").with_text("Reply"),
            NodeSpec::new("div")
                .with_class("MenuItem destructive")
                .with_text("Delete"),
        ]),
    ])
}

#[test]
fn test_context_menu_flow() {
    let t0 = Instant::now();
    let recorder = Recorder::default();
    let mut tree = tree_with(1);
    let mut engine = engine_with(&AnnotatorConfig::default(), vec![Box::new(Labels)])
        .with_replayer(Box::new(recorder.clone()));
    engine.start(&mut tree, t0).unwrap();

    let target = tree.find("#m0").unwrap().unwrap();
    engine
        .secondary_action(&mut tree, target, message_menu(), t0 + ms(10))
        .unwrap();
    // The host renders its menu in response to the replayed input.
    let document = tree.document();
    tree.append_spec(document, &native_menu()).unwrap();

    engine.run_until(&mut tree, t0 + ms(59)).unwrap();
    assert!(engine.open_menu().is_none());
    engine.run_until(&mut tree, t0 + ms(60)).unwrap();

    let menu = engine.open_menu().unwrap();
    assert_eq!(menu.title(), "Message Actions");
    assert_eq!(menu.items().len(), 2);
    assert!(menu.items()[1].destructive);
    assert!(tree.find("#accessible-context-menu").unwrap().is_some());

    assert!(engine.activate_menu_item(&mut tree, 1, t0 + ms(100)).unwrap());
    assert!(engine.open_menu().is_none());
    assert!(tree.find("#accessible-context-menu").unwrap().is_none());
    assert_eq!(
        *recorder.0.lock(),
        vec!["context:m0", "click:backdrop", "click:Delete"]
    );
}

#[test]
fn test_menu_item_out_of_range_keeps_menu_open() {
    let t0 = Instant::now();
    let mut tree = tree_with(1);
    let mut engine = engine_with(&AnnotatorConfig::default(), vec![Box::new(Labels)]);
    engine.start(&mut tree, t0).unwrap();
    let document = tree.document();
    tree.append_spec(document, &native_menu()).unwrap();

    let target = tree.find("#m0").unwrap().unwrap();
    engine
        .secondary_action(&mut tree, target, message_menu(), t0)
        .unwrap();
    engine.run_until(&mut tree, t0 + ms(50)).unwrap();

    assert!(engine.activate_menu_item(&mut tree, 7, t0 + ms(60)).is_err());
    assert!(engine.open_menu().is_some());
    assert!(engine.dismiss_menu(&mut tree).unwrap());
    assert!(!engine.dismiss_menu(&mut tree).unwrap());
}

fn player_menu() -> MenuSource {
    MenuSource {
        title: "Player Controls".to_string(),
        items: None,
        controls: vec![
            ControlItem::new("Play", sel(".toggle-play"))
                .toggled("pause", "Pause")
                .keep_open(),
            ControlItem::new("Previous Track", sel(".player-button[aria-label=\"Previous track\"]"))
                .keep_open(),
            ControlItem::new("Next Track", sel(".player-button[aria-label=\"Next track\"]"))
                .keep_open(),
            ControlItem::new("Close Player", sel(".player-close")).destructive(),
        ],
        scope: Some(sel(".AudioPlayer")),
        backdrop: None,
        delay_ms: Some(150),
    }
}

fn audio_player() -> NodeSpec {
    NodeSpec::new("div").with_class("AudioPlayer").with_children([
        NodeSpec::new("button").with_class("toggle-play").with_text("play"),
        NodeSpec::new("button")
            .with_class("player-button")
            .with_attr("aria-label", "Next track")
            .with_text("next"),
        NodeSpec::new("button").with_class("player-close").with_text("close"),
    ])
}

fn player_engine(recorder: &Recorder, t0: Instant) -> (MemoryTree, ReactiveEngine) {
    let mut tree = tree_with(1);
    let document = tree.document();
    tree.append_spec(document, &audio_player()).unwrap();
    let mut engine = engine_with(&AnnotatorConfig::default(), vec![Box::new(Labels)])
        .with_replayer(Box::new(recorder.clone()));
    engine.start(&mut tree, t0).unwrap();
    (tree, engine)
}

#[test]
fn test_player_menu_stays_open_and_follows_host_state() {
    let t0 = Instant::now();
    let recorder = Recorder::default();
    let (mut tree, mut engine) = player_engine(&recorder, t0);

    let play = tree.find(".toggle-play").unwrap().unwrap();
    engine
        .primary_action(&mut tree, play, player_menu(), t0 + ms(10))
        .unwrap();
    tree.set_attribute(play, "class", "toggle-play pause").unwrap();

    engine.run_until(&mut tree, t0 + ms(159)).unwrap();
    assert!(engine.open_menu().is_none());
    engine.run_until(&mut tree, t0 + ms(160)).unwrap();

    let menu = engine.open_menu().unwrap();
    let labels: Vec<_> = menu.items().iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, vec!["Pause", "Previous Track", "Next Track", "Close Player"]);
    assert!(!menu.items()[1].enabled);

    assert!(engine.activate_menu_item(&mut tree, 0, t0 + ms(200)).unwrap());
    assert!(engine.open_menu().is_some());
    tree.set_attribute(play, "class", "toggle-play").unwrap();

    engine.run_until(&mut tree, t0 + ms(349)).unwrap();
    assert_eq!(engine.open_menu().unwrap().items()[0].label, "Pause");
    engine.run_until(&mut tree, t0 + ms(350)).unwrap();
    assert_eq!(engine.open_menu().unwrap().items()[0].label, "Play");
    assert_eq!(tree.find_all("#accessible-context-menu").unwrap().len(), 1);
    assert_eq!(engine.stats().menus_opened, 1);

    assert!(!engine.activate_menu_item(&mut tree, 1, t0 + ms(400)).unwrap());
    assert!(engine.activate_menu_item(&mut tree, 3, t0 + ms(400)).unwrap());
    assert!(engine.open_menu().is_none());
    assert!(tree.find("#accessible-context-menu").unwrap().is_none());
    assert_eq!(engine.next_deadline(), None);
    assert_eq!(
        *recorder.0.lock(),
        vec!["click:play", "click:play", "click:close"]
    );
}

#[test]
fn test_player_menu_closes_when_player_goes_away() {
    let t0 = Instant::now();
    let recorder = Recorder::default();
    let (mut tree, mut engine) = player_engine(&recorder, t0);

    let play = tree.find(".toggle-play").unwrap().unwrap();
    engine.primary_action(&mut tree, play, player_menu(), t0).unwrap();
    engine.run_until(&mut tree, t0 + ms(150)).unwrap();
    assert!(engine.open_menu().is_some());

    assert!(engine.activate_menu_item(&mut tree, 2, t0 + ms(200)).unwrap());
    let player = tree.find(".AudioPlayer").unwrap().unwrap();
    tree.detach(player).unwrap();
    engine.run_until(&mut tree, t0 + ms(350)).unwrap();

    assert!(engine.open_menu().is_none());
    assert!(tree.find("#accessible-context-menu").unwrap().is_none());
    assert_eq!(*recorder.0.lock(), vec!["click:play", "click:next"]);
}

#[tokio::test(start_paused = true)]
async fn test_runtime_debounces_host_mutations() {
    let runs = Arc::new(AtomicUsize::new(0));
    let tree = SharedTree::new(tree_with(1));
    let engine = engine_with(
        &AnnotatorConfig::default(),
        vec![counting("messages", ".MessageList", runs.clone())],
    );
    let runtime = EngineRuntime::spawn(engine, tree.clone());

    tokio::time::sleep(ms(10)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    for step in 0..5 {
        tree.mutate(|t| touch_message(t, &step.to_string()));
        tokio::time::sleep(ms(50)).await;
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    tokio::time::sleep(ms(400)).await;
    let engine = runtime.shutdown().await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(engine.stats().batches, 1);
}

#[tokio::test(start_paused = true)]
async fn test_runtime_commands_open_menu() {
    let recorder = Recorder::default();
    let tree = SharedTree::new(tree_with(1));
    let engine = engine_with(&AnnotatorConfig::default(), vec![Box::new(Labels)])
        .with_replayer(Box::new(recorder.clone()));
    let runtime = EngineRuntime::spawn(engine, tree.clone());
    tokio::time::sleep(ms(10)).await;

    let target = tree.read(|t| t.find("#m0").unwrap().unwrap());
    tree.mutate(|t| {
        let document = t.document();
        t.append_spec(document, &native_menu()).unwrap();
    });
    runtime
        .send(EngineCommand::SecondaryAction {
            target,
            source: message_menu(),
        })
        .unwrap();
    tokio::time::sleep(ms(100)).await;
    assert!(tree.read(|t| t.find("#accessible-context-menu").unwrap().is_some()));

    runtime.send(EngineCommand::ActivateMenuItem(0)).unwrap();
    tokio::time::sleep(ms(10)).await;
    assert!(tree.read(|t| t.find("#accessible-context-menu").unwrap().is_none()));

    let engine = runtime.shutdown().await.unwrap();
    assert_eq!(engine.stats().menus_opened, 1);
    assert_eq!(recorder.0.lock().last().map(String::as_str), Some("click:Reply"));
}
