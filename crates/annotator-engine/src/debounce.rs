use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::timer::TimerSlot;

/// Accumulates items and releases them together once no new item has
/// arrived for `delay`.
#[derive(Debug, Clone)]
pub struct Debouncer<T: Ord> {
    delay: Duration,
    pending: BTreeSet<T>,
    timer: TimerSlot,
}

impl<T: Ord> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: BTreeSet::new(),
            timer: TimerSlot::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    /// Merge `items` into the pending set and restart the quiet window.
    /// An empty `items` leaves the timer untouched.
    pub fn schedule<I>(&mut self, items: I, now: Instant) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        let mut any = false;
        for item in items {
            self.pending.insert(item);
            any = true;
        }
        if any {
            self.timer.arm(now + self.delay);
            trace!(pending = self.pending.len(), "debounce window restarted");
        }
        any
    }

    pub fn pending(&self) -> &BTreeSet<T> {
        &self.pending
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Release the pending set if the window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<BTreeSet<T>> {
        if self.timer.take_due(now) {
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    /// Drop everything pending without releasing it.
    pub fn cancel(&mut self) -> BTreeSet<T> {
        self.timer.cancel();
        std::mem::take(&mut self.pending)
    }
}
