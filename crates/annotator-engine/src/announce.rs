//! The polite live region every pass speaks through.
//!
//! Two priorities share one region. A persistent announcement is standing
//! state (the open chat's status line) and is re-spoken whenever nothing
//! else holds the region. A transient announcement (a new message) takes the
//! region for a fixed window, then the region reverts to the persistent text.

use std::time::{Duration, Instant};

use annotator_core::{HostTree, NodeId, Result, SYNTHETIC_ATTR};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::timer::TimerSlot;

const VISUALLY_HIDDEN: &str =
    "position: absolute; left: -9999px; top: -9999px; width: 1px; height: 1px; overflow: hidden;";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Persistent,
    Transient,
}

/// Text written to the live region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpokenText {
    pub at: Instant,
    pub text: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Idle,
    Persistent,
    Transient,
}

pub struct AnnouncementChannel {
    region: Option<NodeId>,
    timeout: Duration,
    persistent: String,
    transient: Option<String>,
    reversion: TimerSlot,
    current: String,
    tx: broadcast::Sender<SpokenText>,
}

impl AnnouncementChannel {
    pub fn new(timeout: Duration) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            region: None,
            timeout,
            persistent: String::new(),
            transient: None,
            reversion: TimerSlot::new(),
            current: String::new(),
            tx,
        }
    }

    /// Append the live region to the document if it is not already there.
    pub fn install(&mut self, tree: &mut dyn HostTree) -> Result<NodeId> {
        if let Some(region) = self.region {
            if tree.is_connected(region) {
                return Ok(region);
            }
        }

        let region = tree.create_element("div");
        tree.set_attribute(region, SYNTHETIC_ATTR, "live-region")?;
        tree.set_attribute(region, "aria-live", "polite")?;
        tree.set_attribute(region, "aria-atomic", "true")?;
        tree.set_attribute(region, "style", VISUALLY_HIDDEN)?;
        let document = tree.document();
        tree.insert_child(document, region, None)?;

        self.region = Some(region);
        self.current.clear();
        info!(%region, "live region installed");
        Ok(region)
    }

    pub fn region(&self) -> Option<NodeId> {
        self.region
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpokenText> {
        self.tx.subscribe()
    }

    /// Text currently held by the region.
    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn persistent(&self) -> &str {
        &self.persistent
    }

    pub fn state(&self) -> ChannelState {
        if self.transient.is_some() {
            ChannelState::Transient
        } else if self.persistent.is_empty() {
            ChannelState::Idle
        } else {
            ChannelState::Persistent
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.reversion.deadline()
    }

    /// Replace the standing text. Written now unless a transient holds the
    /// region; identical text is not rewritten. Empty text clears.
    pub fn announce_persistent(
        &mut self,
        tree: &mut dyn HostTree,
        text: &str,
        now: Instant,
    ) -> Result<()> {
        self.persistent = text.trim().to_string();
        if self.transient.is_some() {
            trace!("persistent update held behind transient announcement");
            return Ok(());
        }
        let text = self.persistent.clone();
        self.write(tree, &text, Priority::Persistent, now, false)
    }

    /// Speak `text` now and hold the region for the transient timeout,
    /// cancelling any earlier reversion. Empty text clears the region unless
    /// a transient announcement is still active.
    pub fn announce_transient(
        &mut self,
        tree: &mut dyn HostTree,
        text: &str,
        now: Instant,
    ) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            if self.transient.is_some() {
                debug!("clear ignored while a transient announcement is active");
                return Ok(());
            }
            return self.write(tree, "", Priority::Transient, now, false);
        }

        self.transient = Some(text.to_string());
        self.reversion.arm(now + self.timeout);
        self.write(tree, text, Priority::Transient, now, true)
    }

    /// Revert to the persistent text once the transient window has elapsed.
    /// Returns `true` if a reversion happened.
    pub fn poll(&mut self, tree: &mut dyn HostTree, now: Instant) -> Result<bool> {
        if !self.reversion.take_due(now) {
            return Ok(false);
        }
        self.transient = None;
        let text = self.persistent.clone();
        debug!(persistent = %text, "transient window elapsed, reverting");
        self.write(tree, &text, Priority::Persistent, now, false)?;
        Ok(true)
    }

    fn write(
        &mut self,
        tree: &mut dyn HostTree,
        text: &str,
        priority: Priority,
        now: Instant,
        force: bool,
    ) -> Result<()> {
        if !force && self.current == text {
            return Ok(());
        }
        let Some(region) = self.region else {
            trace!(text, "no live region installed, announcement dropped");
            return Ok(());
        };
        tree.set_text_content(region, text)?;
        self.current = text.to_string();
        debug!(?priority, text, "announced");
        // No subscribers is not an error.
        let _ = self.tx.send(SpokenText {
            at: now,
            text: text.to_string(),
            priority,
        });
        Ok(())
    }
}
