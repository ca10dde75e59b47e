//! The reactive engine: acquires the observed root, classifies mutation
//! records, debounces pass batches and runs them in a fixed order.
//!
//! The engine is a state machine over explicit instants. It never sleeps or
//! spawns; a driver feeds it records through [`ReactiveEngine::observe`] and
//! calls [`ReactiveEngine::poll`] at or after [`ReactiveEngine::next_deadline`].

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use annotator_core::{
    AnnotatorConfig, AnnotatorError, EngineConfig, HostTree, MarkerStore, MutationRecord, NodeId,
    PassId, Result, Selector,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, debug_span, info, trace, warn};

use crate::announce::{AnnouncementChannel, SpokenText};
use crate::classifier::Classifier;
use crate::context::PassContext;
use crate::debounce::Debouncer;
use crate::menu::{
    collect_menu_items, AccessibleMenu, InputReplayer, MenuProbe, MenuRequest, MenuSource, NoopReplayer,
};
use crate::registry::{PassRegistry, RegisteredPass};
use crate::timer::{earliest, TimerSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    /// Not started.
    Idle,
    /// Probing for the observed root.
    AwaitingRoot,
    /// Root acquired; records are classified and batched.
    Observing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub root_probes: u64,
    pub root_acquisitions: u64,
    pub records_seen: u64,
    pub records_discarded: u64,
    pub batches: u64,
    pub passes_run: u64,
    pub pass_failures: u64,
    pub writes: u64,
    pub markers_swept: u64,
    pub menus_opened: u64,
}

pub struct ReactiveEngine {
    config: EngineConfig,
    root_selector: Selector,
    phase: EnginePhase,
    observed_root: Option<NodeId>,
    root_probe: TimerSlot,
    registry: PassRegistry,
    classifier: Classifier,
    markers: MarkerStore,
    channel: AnnouncementChannel,
    batch: Debouncer<PassId>,
    menu_probe: MenuProbe,
    open_menu: Option<AccessibleMenu>,
    menu_source: Option<MenuSource>,
    replayer: Box<dyn InputReplayer>,
    replaying: bool,
    batches_since_sweep: u32,
    stats: EngineStats,
}

impl ReactiveEngine {
    /// Seal `registry` and build an engine around it.
    pub fn new(config: &AnnotatorConfig, mut registry: PassRegistry) -> Result<Self> {
        let root_selector = Selector::parse(&config.engine.root_selector)?;
        registry.seal()?;

        let mut classifier = Classifier::new(config.engine.owned_attribute_prefixes.clone());
        for id in registry.order() {
            if let Some(region) = registry.region(*id) {
                classifier.add_region(*id, region.clone());
            }
        }

        info!(
            passes = registry.len(),
            root = %root_selector,
            "annotation engine configured"
        );

        Ok(Self {
            root_selector,
            phase: EnginePhase::Idle,
            observed_root: None,
            root_probe: TimerSlot::new(),
            classifier,
            markers: MarkerStore::new(),
            channel: AnnouncementChannel::new(config.announcer.transient_timeout()),
            batch: Debouncer::new(config.engine.batch_debounce()),
            menu_probe: MenuProbe::new(config.engine.menu_probe()),
            open_menu: None,
            menu_source: None,
            replayer: Box::new(NoopReplayer),
            replaying: false,
            batches_since_sweep: 0,
            stats: EngineStats::default(),
            registry,
            config: config.engine.clone(),
        })
    }

    pub fn with_replayer(mut self, replayer: Box<dyn InputReplayer>) -> Self {
        self.replayer = replayer;
        self
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn observed_root(&self) -> Option<NodeId> {
        self.observed_root
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn registry(&self) -> &PassRegistry {
        &self.registry
    }

    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    pub fn channel(&self) -> &AnnouncementChannel {
        &self.channel
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpokenText> {
        self.channel.subscribe()
    }

    /// Passes waiting for the current debounce window to close.
    pub fn pending_passes(&self) -> &BTreeSet<PassId> {
        self.batch.pending()
    }

    pub fn open_menu(&self) -> Option<&AccessibleMenu> {
        self.open_menu.as_ref()
    }

    /// Begin probing for the observed root. Calling it again is a no-op.
    pub fn start(&mut self, tree: &mut dyn HostTree, now: Instant) -> Result<EnginePhase> {
        if self.phase != EnginePhase::Idle {
            return Ok(self.phase);
        }
        self.phase = EnginePhase::AwaitingRoot;
        self.probe_root(tree, now)?;
        Ok(self.phase)
    }

    /// Classify records and schedule the passes they trigger. Records that
    /// arrive before the root is acquired are dropped.
    pub fn observe(&mut self, tree: &dyn HostTree, records: Vec<MutationRecord>, now: Instant) {
        let Some(root) = self.observed_root else {
            trace!(count = records.len(), "records before root acquisition dropped");
            return;
        };

        let mut triggered = BTreeSet::new();
        for record in &records {
            self.stats.records_seen += 1;
            match self.classifier.classify(tree, root, record) {
                Ok(passes) => triggered.extend(passes),
                Err(reason) => {
                    self.stats.records_discarded += 1;
                    trace!(?reason, target = %record.target, kind = ?record.kind, "record discarded");
                }
            }
        }

        if self.batch.schedule(triggered, now) {
            debug!(pending = ?self.pending_names(), "batch scheduled");
        }
    }

    /// Fire everything due at `now`.
    pub fn poll(&mut self, tree: &mut dyn HostTree, now: Instant) -> Result<()> {
        if self.phase == EnginePhase::AwaitingRoot && self.root_probe.take_due(now) {
            self.probe_root(tree, now)?;
        }

        if let Some(root) = self.observed_root {
            if !tree.is_connected(root) {
                warn!(%root, "observed root left the document, reacquiring");
                self.observed_root = None;
                self.phase = EnginePhase::AwaitingRoot;
                self.batch.cancel();
                self.probe_root(tree, now)?;
            }
        }

        self.channel.poll(tree, now)?;

        if let Some(passes) = self.batch.poll(now) {
            self.run_batch(tree, passes, now)?;
        }

        if let Some(request) = self.menu_probe.poll(now) {
            self.open_menu_from(tree, request)?;
        }
        Ok(())
    }

    /// Drain the host's records, then poll.
    pub fn pump(&mut self, tree: &mut dyn HostTree, now: Instant) -> Result<()> {
        let records = tree.take_records();
        if !records.is_empty() {
            self.observe(&*tree, records, now);
        }
        self.poll(tree, now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let root_probe = match self.phase {
            EnginePhase::AwaitingRoot => self.root_probe.deadline(),
            _ => None,
        };
        earliest([
            root_probe,
            self.batch.next_deadline(),
            self.channel.next_deadline(),
            self.menu_probe.next_deadline(),
        ])
    }

    /// Step through every deadline up to and including `until`.
    pub fn run_until(&mut self, tree: &mut dyn HostTree, until: Instant) -> Result<()> {
        while let Some(next) = self.next_deadline() {
            if next > until {
                break;
            }
            self.pump(tree, next)?;
        }
        Ok(())
    }

    /// Replay a secondary action on `target` and read the resulting native
    /// menu once the probe delay has passed.
    pub fn secondary_action(
        &mut self,
        tree: &mut dyn HostTree,
        target: NodeId,
        source: MenuSource,
        now: Instant,
    ) -> Result<()> {
        if !tree.contains(target) {
            return Err(AnnotatorError::StaleNode(target));
        }
        self.replayer.secondary_action(&*tree, target);
        self.menu_probe.request(source, now);
        Ok(())
    }

    /// Replay activation on a host control, such as a play button, and read
    /// the menu it exposes once the source's delay has passed.
    pub fn primary_action(
        &mut self,
        tree: &mut dyn HostTree,
        target: NodeId,
        source: MenuSource,
        now: Instant,
    ) -> Result<()> {
        if !tree.contains(target) {
            return Err(AnnotatorError::StaleNode(target));
        }
        self.replayer.activate(&*tree, target);
        self.menu_probe.request(source, now);
        Ok(())
    }

    /// Activate the native item behind button `index` of the open menu.
    /// The menu closes, unless the item keeps it open, in which case it is
    /// read again after the source's delay. Returns `false` when no menu is
    /// open or the item is disabled.
    pub fn activate_menu_item(
        &mut self,
        tree: &mut dyn HostTree,
        index: usize,
        now: Instant,
    ) -> Result<bool> {
        let Some(menu) = self.open_menu.take() else {
            return Ok(false);
        };
        let Some(item) = menu.items().get(index).cloned() else {
            let count = menu.items().len();
            self.open_menu = Some(menu);
            return Err(AnnotatorError::InvalidOperation(format!(
                "menu has {count} items, no item {index}"
            )));
        };
        if !item.enabled {
            self.open_menu = Some(menu);
            return Ok(false);
        }

        let source = self.menu_source.take();
        match source {
            Some(source) if item.keep_open => {
                self.open_menu = Some(menu);
                self.menu_probe.refresh(source.clone(), now);
                self.menu_source = Some(source);
            }
            _ => menu.dismiss(tree)?,
        }
        if let Some(native) = item.native.filter(|native| tree.contains(*native)) {
            debug!(label = %item.label, keep_open = item.keep_open, "activating native menu item");
            self.replayer.activate(&*tree, native);
        }
        Ok(true)
    }

    pub fn dismiss_menu(&mut self, tree: &mut dyn HostTree) -> Result<bool> {
        self.menu_source = None;
        match self.open_menu.take() {
            Some(menu) => {
                self.menu_probe.cancel();
                menu.dismiss(tree)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn probe_root(&mut self, tree: &mut dyn HostTree, now: Instant) -> Result<()> {
        self.stats.root_probes += 1;
        let document = tree.document();
        match self.root_selector.query(&*tree, document) {
            Some(root) => self.attach(tree, root, now),
            None => {
                let retry = self.config.root_retry();
                debug!(root = %self.root_selector, ?retry, "observed root not present yet");
                self.root_probe.arm(now + retry);
                Ok(())
            }
        }
    }

    fn attach(&mut self, tree: &mut dyn HostTree, root: NodeId, now: Instant) -> Result<()> {
        // Anything buffered so far predates the subscription.
        let stale = tree.take_records();
        trace!(count = stale.len(), "pre-attach records dropped");

        self.observed_root = Some(root);
        self.phase = EnginePhase::Observing;
        self.stats.root_acquisitions += 1;
        self.channel.install(tree)?;
        info!(%root, "observed root acquired, replaying existing content");

        let all: BTreeSet<PassId> = self.registry.ids().collect();
        self.replaying = true;
        let replay = self.execute(tree, &all, now);
        self.replaying = false;
        replay?;
        self.after_batch(tree, now);
        Ok(())
    }

    fn run_batch(&mut self, tree: &mut dyn HostTree, mut passes: BTreeSet<PassId>, now: Instant) -> Result<()> {
        passes.extend(self.classifier.ambient_passes().iter().copied());
        self.stats.batches += 1;
        let span = debug_span!("batch", number = self.stats.batches, passes = passes.len());
        let _guard = span.enter();

        self.execute(tree, &passes, now)?;
        self.after_batch(tree, now);
        Ok(())
    }

    fn execute(&mut self, tree: &mut dyn HostTree, passes: &BTreeSet<PassId>, now: Instant) -> Result<()> {
        let Some(root) = self.observed_root else {
            return Err(AnnotatorError::InvalidOperation(
                "batch executed without an observed root".to_string(),
            ));
        };
        let order = self.registry.order().to_vec();
        for id in order.into_iter().filter(|id| passes.contains(id)) {
            self.run_pass(tree, id, root, now);
        }
        Ok(())
    }

    /// Run one pass over its region roots. Errors and panics are logged and
    /// counted; they never stop the batch.
    fn run_pass(&mut self, tree: &mut dyn HostTree, id: PassId, root: NodeId, now: Instant) {
        let Some(RegisteredPass { name, region, pass }) = self.registry.get_mut(id) else {
            return;
        };
        let roots = region.roots(&*tree, root);
        let mut ctx = PassContext::new(
            tree,
            &mut self.markers,
            &mut self.channel,
            id,
            name.as_str(),
            root,
            now,
            self.replaying,
            self.config.mirror_markers,
        );

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let mut failures = Vec::new();
            if roots.is_empty() {
                if let Err(e) = pass.region_absent(&mut ctx) {
                    failures.push(e);
                }
            }
            for region_root in &roots {
                if !ctx.tree().contains(*region_root) {
                    continue;
                }
                if let Err(e) = pass.run(&mut ctx, *region_root) {
                    failures.push(e);
                }
            }
            failures
        }));

        self.stats.passes_run += 1;
        self.stats.writes += ctx.writes() as u64;
        match outcome {
            Ok(failures) => {
                for error in failures {
                    self.stats.pass_failures += 1;
                    warn!(pass = %name, %error, "annotation pass failed");
                }
            }
            Err(panic) => {
                self.stats.pass_failures += 1;
                warn!(pass = %name, panic = %panic_message(&*panic), "annotation pass panicked");
            }
        }
        trace!(pass = %name, roots = roots.len(), "pass finished");
    }

    fn after_batch(&mut self, tree: &mut dyn HostTree, now: Instant) {
        let produced = tree.take_records();
        if !produced.is_empty() {
            trace!(count = produced.len(), "classifying records written during batch");
            self.observe(&*tree, produced, now);
        }

        self.batches_since_sweep += 1;
        let every = self.config.sweep_markers_every;
        if every > 0 && self.batches_since_sweep >= every {
            self.batches_since_sweep = 0;
            self.stats.markers_swept += self.markers.sweep(&*tree) as u64;
        }
    }

    fn open_menu_from(&mut self, tree: &mut dyn HostTree, request: MenuRequest) -> Result<()> {
        let MenuRequest { source, refresh } = request;
        let document = tree.document();
        let items = collect_menu_items(&*tree, document, &source);
        if items.is_empty() {
            debug!(title = %source.title, refresh, "native menu not found");
            if refresh {
                // The controls went away with the menu still showing.
                self.dismiss_menu(tree)?;
            }
            return Ok(());
        }

        if let Some(backdrop) = source
            .backdrop
            .as_ref()
            .and_then(|backdrop| backdrop.query(&*tree, document))
        {
            self.replayer.activate(&*tree, backdrop);
        }
        if let Some(previous) = self.open_menu.take() {
            previous.dismiss(tree)?;
        }

        self.open_menu = Some(AccessibleMenu::open(tree, &source.title, items)?);
        self.menu_source = Some(source);
        if !refresh {
            self.stats.menus_opened += 1;
        }
        Ok(())
    }

    fn pending_names(&self) -> Vec<&str> {
        self.batch
            .pending()
            .iter()
            .filter_map(|id| self.registry.name(*id))
            .collect()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
