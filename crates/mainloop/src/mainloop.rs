//! The owner-thread scheduler loop.

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::MainloopConfig;
use crate::error::{MainloopError, TaskError};
use crate::handle::{LoopState, MainloopHandle, Shared};
use crate::queue::{self, Consumer, Request};
use crate::stats::MainloopStats;
use crate::table::TaskTable;
use crate::task::{TaskId, TaskKind, Timing};
use crate::timing::{self, Clock, IdleWindow, Millis, MonotonicClock};

/// A single-threaded cooperative task scheduler.
///
/// The thread that creates a `Mainloop` owns it: the value is `!Send`, so
/// only that thread can call [`run`](Mainloop::run) or
/// [`run_once`](Mainloop::run_once), and every task callback executes there.
/// Other threads interact through [`MainloopHandle`]s obtained from
/// [`handle`](Mainloop::handle).
///
/// ```compile_fail
/// fn assert_send<T: Send>() {}
/// assert_send::<mainloop::Mainloop>();
/// ```
pub struct Mainloop {
    handle: MainloopHandle,
    consumer: Consumer,
    table: TaskTable,
    config: MainloopConfig,
    stats: MainloopStats,
    /// Set when the loop first observes `Running`; starts the idle timer.
    last_activity: Option<Millis>,
    finished: bool,
    /// Pins the loop to the thread that created it.
    _owner: PhantomData<*const ()>,
}

impl Mainloop {
    /// Create a mainloop with default queue sizing.
    pub fn create(
        name: &str,
        max_tasks: usize,
        idle_interval_ms: u32,
    ) -> Result<Self, MainloopError> {
        Self::with_config(MainloopConfig::new(name, max_tasks, idle_interval_ms))
    }

    pub fn with_config(config: MainloopConfig) -> Result<Self, MainloopError> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a mainloop driven by a custom clock.
    pub fn with_clock(config: MainloopConfig, clock: Arc<dyn Clock>) -> Result<Self, MainloopError> {
        config.validate()?;
        let (producer, consumer) = queue::channel(config.queue_capacity);
        let shared = Arc::new(Shared::new(config.name.clone(), config.max_tasks, clock));
        info!(
            mainloop = %config.name,
            max_tasks = config.max_tasks,
            idle_interval_ms = config.idle_interval_ms,
            queue_capacity = config.queue_capacity,
            "mainloop created"
        );
        Ok(Self {
            handle: MainloopHandle { shared, producer },
            consumer,
            table: TaskTable::new(config.max_tasks),
            config,
            stats: MainloopStats::default(),
            last_activity: None,
            finished: false,
            _owner: PhantomData,
        })
    }

    /// A thread-safe handle for registering tasks and controlling the loop.
    pub fn handle(&self) -> MainloopHandle {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &MainloopConfig {
        &self.config
    }

    pub fn state(&self) -> LoopState {
        self.handle.state()
    }

    pub fn stats(&self) -> &MainloopStats {
        &self.stats
    }

    /// Records currently applied to the table.
    pub fn table(&self) -> &TaskTable {
        &self.table
    }

    /// Block the calling thread, executing tasks until the loop is stopped.
    ///
    /// With `auto_start` the loop starts immediately; otherwise it waits for
    /// [`MainloopHandle::start`]. Returns once `Stopped` is observed and all
    /// pending requests have been applied. A loop that has returned from
    /// `run` cannot be run again.
    pub fn run(&mut self, auto_start: bool) -> Result<(), MainloopError> {
        self.ensure_runnable()?;
        if auto_start {
            self.handle.start()?;
        }
        info!(mainloop = %self.config.name, auto_start, "mainloop run entered");

        loop {
            self.drain();
            match self.state() {
                LoopState::Stopped => break,
                LoopState::Created => {
                    if let Some(request) = self.consumer.wait(None) {
                        self.apply(request);
                    }
                    continue;
                }
                LoopState::Running => {}
            }

            let now = self.enter_running();
            if let Some(id) = self.table.next_runnable(now, &self.idle_window(now)) {
                self.execute(id, now);
                continue;
            }

            if self.config.exit_when_idle && self.table.is_empty() {
                info!(mainloop = %self.config.name, "no tasks left, stopping");
                self.handle.shared.mark_stopped();
                break;
            }

            let timeout = self
                .table
                .next_deadline(&self.idle_window(now))
                .map(|at| Duration::from_millis(at.saturating_sub(now)));
            if let Some(request) = self.consumer.wait(timeout) {
                self.apply(request);
            }
        }

        self.drain();
        self.finished = true;
        info!(
            mainloop = %self.config.name,
            executions = self.stats.total_executions,
            faults = self.stats.faults,
            remaining = self.table.len(),
            "mainloop stopped"
        );
        Ok(())
    }

    /// Apply pending requests and execute at most one due task. Never blocks.
    ///
    /// Useful for embedding the loop in another loop and for driving it with
    /// a manual clock. Returns the id of the task that ran.
    pub fn run_once(&mut self) -> Result<Option<TaskId>, MainloopError> {
        self.ensure_runnable()?;
        self.drain();
        if self.state() != LoopState::Running {
            return Ok(None);
        }
        let now = self.enter_running();
        let next = self.table.next_runnable(now, &self.idle_window(now));
        if let Some(id) = next {
            self.execute(id, now);
        }
        Ok(next)
    }

    fn ensure_runnable(&self) -> Result<(), MainloopError> {
        if self.finished {
            return Err(MainloopError::InvalidState(format!(
                "mainloop '{}' has already stopped",
                self.config.name
            )));
        }
        Ok(())
    }

    /// Current time; the first call in `Running` also starts the idle timer.
    fn enter_running(&mut self) -> Millis {
        let now = self.handle.shared.clock.now_ms();
        if self.last_activity.is_none() {
            debug!(mainloop = %self.config.name, now, "mainloop running");
            self.last_activity = Some(now);
        }
        now
    }

    fn idle_window(&self, now: Millis) -> IdleWindow {
        IdleWindow {
            last_activity: self.last_activity.unwrap_or(now),
            interval_ms: self.config.idle_interval_ms,
        }
    }

    /// Safepoint: apply every request submitted so far.
    fn drain(&mut self) {
        while let Some(request) = self.consumer.try_next() {
            self.apply(request);
        }
    }

    fn apply(&mut self, request: Request) {
        match request {
            Request::Add(record) => {
                if let Some(parent) = record.parent() {
                    if !record.is_live() || !self.table.contains(parent) {
                        debug!(task = %record.name(), %parent, "dispatch for unregistered bridge dropped");
                        self.stats.record_dropped_dispatches(1);
                        self.release(1);
                        return;
                    }
                }
                let name = record.name().to_string();
                if let Err(e) = self.table.insert(record) {
                    // Only reachable if the slot ledger and table disagree.
                    warn!(mainloop = %self.config.name, task = %name, "insert failed: {}", e);
                    self.release(1);
                }
            }
            Request::Remove { kind, selector } => match self.table.remove(kind, &selector) {
                Some(record) => {
                    let mut freed = 1;
                    if record.kind() == TaskKind::EventBridge {
                        let orphans = self.table.remove_children(record.id());
                        self.stats.record_dropped_dispatches(orphans.len());
                        freed += orphans.len();
                    }
                    debug!(task = %record.name(), id = %record.id(), kind = ?record.kind(), "task removed");
                    self.stats.record_removal(true);
                    self.release(freed);
                }
                None => {
                    debug!(%selector, ?kind, "remove matched no task");
                    self.stats.record_removal(false);
                }
            },
            Request::Start => debug!(mainloop = %self.config.name, "start observed"),
            Request::Stop => debug!(mainloop = %self.config.name, "stop observed"),
        }
    }

    fn release(&self, slots: usize) {
        self.handle.shared.slots.release(slots);
    }

    /// Invoke one task and update its timing. Callback errors and panics are
    /// contained here.
    fn execute(&mut self, id: TaskId, now: Millis) {
        let Some(record) = self.table.get_mut(id) else {
            return;
        };
        if !record.is_live() {
            debug!(task = %record.name(), %id, "dispatch for unregistered bridge dropped");
            self.table.remove_id(id);
            self.stats.record_dropped_dispatches(1);
            self.release(1);
            return;
        }

        let kind = record.kind();
        let name = record.name().to_string();
        debug!(task = %name, %id, ?kind, priority = record.priority(), "executing");

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| record.callback.invoke()))
            .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))));
        let elapsed = started.elapsed();
        let finished_at = self.handle.shared.clock.now_ms();

        self.stats.record_execution(&name, elapsed, outcome.is_err());
        if let Err(e) = outcome {
            warn!(task = %name, %id, "task fault: {}", e);
        }

        let timing = record.timing;
        match timing {
            Timing::Periodic { period_ms, next_due_at } => {
                record.timing = Timing::Periodic {
                    period_ms,
                    next_due_at: timing::reschedule(next_due_at, period_ms, now),
                };
            }
            Timing::Idle { .. } => {
                record.timing = Timing::Idle {
                    last_run_at: Some(finished_at),
                };
            }
            Timing::OneShot { .. } | Timing::Immediate => {
                self.table.remove_id(id);
                self.release(1);
            }
            Timing::EventBridge => {}
        }

        if kind != TaskKind::Idle {
            self.last_activity = Some(finished_at);
        }
    }
}

impl Drop for Mainloop {
    fn drop(&mut self) {
        // Handles outliving the loop must see it as stopped.
        self.handle.shared.mark_stopped();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".into()
    }
}

#[cfg(test)]
mod tests;
