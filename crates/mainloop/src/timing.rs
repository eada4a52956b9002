//! Clocks and due-time arithmetic.
//!
//! Everything here is a pure function of `now` and a task's timing fields;
//! the scheduler loop owns all mutation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::task::Timing;

/// Milliseconds on a monotonic clock.
pub type Millis = u64;

/// Monotonic millisecond source shared by producers and the owner thread.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Millis;
}

/// [`Clock`] backed by [`Instant`], starting at zero when created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> Millis {
        self.origin.elapsed().as_millis() as Millis
    }
}

/// Hand-driven clock for tests and simulation. Never moves backwards.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move to `at`, ignored if `at` lies in the past.
    pub fn set(&self, at: Millis) {
        self.now.fetch_max(at, Ordering::AcqRel);
    }

    pub fn advance(&self, by: Millis) {
        self.now.fetch_add(by, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.load(Ordering::Acquire)
    }
}

/// Idle eligibility inputs tracked by the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleWindow {
    /// When the last non-idle task finished (or the loop started running).
    pub last_activity: Millis,
    pub interval_ms: u32,
}

impl IdleWindow {
    /// Earliest instant an idle task that last finished at `last_run_at`
    /// may fire again.
    pub fn ready_at(&self, last_run_at: Option<Millis>) -> Millis {
        let since = last_run_at.map_or(self.last_activity, |run| run.max(self.last_activity));
        since.saturating_add(Millis::from(self.interval_ms))
    }
}

/// First due time of a periodic or one-shot task.
pub fn initial_due(registered_at: Millis, delay_ms: u32) -> Millis {
    registered_at.saturating_add(Millis::from(delay_ms))
}

/// Whether a timed or immediate task should fire at `now`.
///
/// Idle tasks are never "due" in this sense; see [`idle_ready`].
pub fn is_due(timing: &Timing, now: Millis) -> bool {
    match *timing {
        Timing::Periodic { next_due_at, .. } | Timing::OneShot { next_due_at } => {
            now >= next_due_at
        }
        Timing::Immediate => true,
        Timing::Idle { .. } | Timing::EventBridge => false,
    }
}

/// Whether an idle task may fire at `now`, given the current window.
pub fn idle_ready(timing: &Timing, window: &IdleWindow, now: Millis) -> bool {
    match *timing {
        Timing::Idle { last_run_at } => now >= window.ready_at(last_run_at),
        _ => false,
    }
}

/// When this task next wants the loop awake, if ever.
pub fn wake_at(timing: &Timing, window: &IdleWindow) -> Option<Millis> {
    match *timing {
        Timing::Periodic { next_due_at, .. } | Timing::OneShot { next_due_at } => {
            Some(next_due_at)
        }
        Timing::Idle { last_run_at } => Some(window.ready_at(last_run_at)),
        Timing::Immediate => Some(0),
        Timing::EventBridge => None,
    }
}

/// Next due time of a periodic task that just fired.
///
/// Advances by one period from the slot it fired for. A task that is a full
/// period or more behind is rebased to `now + period` instead of firing
/// repeatedly to catch up.
pub fn reschedule(next_due_at: Millis, period_ms: u32, now: Millis) -> Millis {
    let period = Millis::from(period_ms);
    let next = next_due_at.saturating_add(period);
    if next <= now {
        now.saturating_add(period)
    } else {
        next
    }
}
