//! Tokio driver for [`ReactiveEngine`].
//!
//! The host mutates the document through [`SharedTree::mutate`], which wakes
//! the driver; the driver pumps records into the engine and sleeps until the
//! engine's next deadline.

use std::sync::Arc;
use std::time::Instant;

use annotator_core::{AnnotatorError, HostTree, NodeId, Result};
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::ReactiveEngine;
use crate::menu::MenuSource;

/// A host tree shared between the host and the engine task.
pub struct SharedTree<T> {
    inner: Arc<Mutex<T>>,
    changed: Arc<Notify>,
}

impl<T> Clone for SharedTree<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            changed: Arc::clone(&self.changed),
        }
    }
}

impl<T: HostTree> SharedTree<T> {
    pub fn new(tree: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tree)),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Mutate the tree and wake the engine.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let out = {
            let mut guard = self.inner.lock();
            f(&mut guard)
        };
        self.changed.notify_one();
        out
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.inner.lock();
        f(&guard)
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    async fn changed(&self) {
        self.changed.notified().await
    }
}

#[derive(Debug, Clone)]
pub enum EngineCommand {
    SecondaryAction { target: NodeId, source: MenuSource },
    PrimaryAction { target: NodeId, source: MenuSource },
    ActivateMenuItem(usize),
    DismissMenu,
}

/// Handle to a running engine task.
pub struct EngineRuntime {
    commands: mpsc::UnboundedSender<EngineCommand>,
    cancel: CancellationToken,
    handle: JoinHandle<ReactiveEngine>,
}

impl EngineRuntime {
    pub fn spawn<T>(mut engine: ReactiveEngine, tree: SharedTree<T>) -> Self
    where
        T: HostTree + Send + 'static,
    {
        let (commands, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            {
                let mut guard = tree.lock();
                if let Err(e) = engine.start(&mut *guard, clock_now()) {
                    warn!(error = %e, "engine failed to start");
                }
            }
            info!("annotation engine running");

            loop {
                let deadline = engine.next_deadline();
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tree.changed() => {
                        let mut guard = tree.lock();
                        if let Err(e) = engine.pump(&mut *guard, clock_now()) {
                            warn!(error = %e, "engine pump failed");
                        }
                    }
                    Some(command) = rx.recv() => {
                        let mut guard = tree.lock();
                        if let Err(e) = apply_command(&mut engine, &mut *guard, command) {
                            warn!(error = %e, "engine command failed");
                        }
                    }
                    _ = sleep_until(deadline) => {
                        let mut guard = tree.lock();
                        if let Err(e) = engine.pump(&mut *guard, clock_now()) {
                            warn!(error = %e, "engine poll failed");
                        }
                    }
                }
            }

            info!(stats = ?engine.stats(), "annotation engine stopped");
            engine
        });

        Self {
            commands,
            cancel,
            handle,
        }
    }

    pub fn send(&self, command: EngineCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| AnnotatorError::InvalidOperation("engine task has stopped".to_string()))
    }

    /// Stop the task and hand the engine back.
    pub async fn shutdown(self) -> Result<ReactiveEngine> {
        self.cancel.cancel();
        self.handle
            .await
            .map_err(|e| AnnotatorError::InvalidOperation(format!("engine task failed: {e}")))
    }
}

fn apply_command(
    engine: &mut ReactiveEngine,
    tree: &mut dyn HostTree,
    command: EngineCommand,
) -> Result<()> {
    let now = clock_now();
    debug!(?command, "engine command");
    match command {
        EngineCommand::SecondaryAction { target, source } => {
            engine.secondary_action(tree, target, source, now)
        }
        EngineCommand::PrimaryAction { target, source } => {
            engine.primary_action(tree, target, source, now)
        }
        EngineCommand::ActivateMenuItem(index) => {
            engine.activate_menu_item(tree, index, now).map(|_| ())
        }
        EngineCommand::DismissMenu => engine.dismiss_menu(tree).map(|_| ()),
    }?;
    engine.pump(tree, now)
}

fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
