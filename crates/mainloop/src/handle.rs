//! The any-thread side of the mainloop.
//!
//! A [`MainloopHandle`] is cheap to clone and safe to use from any thread.
//! Every call returns as soon as its request is enqueued; none of them wait
//! for the owner thread.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{MainloopError, TaskResult};
use crate::queue::{Producer, Request, SlotLedger};
use crate::task::{
    BridgeLink, Callback, Priority, TaskFn, TaskId, TaskKind, TaskRecord, TaskSelector, Timing,
};
use crate::timing::{self, Clock, Millis};

/// Lifecycle of a mainloop. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    Created,
    Running,
    Stopped,
}

impl LoopState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LoopState::Created,
            1 => LoopState::Running,
            _ => LoopState::Stopped,
        }
    }
}

/// State shared by the owner and every handle.
pub(crate) struct Shared {
    pub(crate) name: String,
    state: AtomicU8,
    pub(crate) slots: SlotLedger,
    next_id: AtomicU64,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Shared {
    pub(crate) fn new(name: String, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            state: AtomicU8::new(LoopState::Created as u8),
            slots: SlotLedger::new(capacity),
            next_id: AtomicU64::new(1),
            clock,
        }
    }

    pub(crate) fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Created -> Running. False if the loop was not in `Created`.
    fn mark_running(&self) -> bool {
        self.state
            .compare_exchange(
                LoopState::Created as u8,
                LoopState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Any -> Stopped. Returns the previous state.
    pub(crate) fn mark_stopped(&self) -> LoopState {
        LoopState::from_u8(self.state.swap(LoopState::Stopped as u8, Ordering::AcqRel))
    }

    fn allocate_id(&self) -> TaskId {
        TaskId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Thread-safe front door to a [`Mainloop`](crate::Mainloop).
#[derive(Clone)]
pub struct MainloopHandle {
    pub(crate) shared: Arc<Shared>,
    pub(crate) producer: Producer,
}

impl fmt::Debug for MainloopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainloopHandle")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl MainloopHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> LoopState {
        self.shared.state()
    }

    /// Table slots in use, including adds still in flight.
    pub fn task_count(&self) -> usize {
        self.shared.slots.occupied()
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.capacity()
    }

    /// Current reading of the loop's clock.
    pub fn now_ms(&self) -> Millis {
        self.shared.clock.now_ms()
    }

    /// Let the loop start executing tasks. No-op unless still `Created`.
    pub fn start(&self) -> Result<(), MainloopError> {
        if !self.shared.mark_running() {
            return Ok(());
        }
        info!(mainloop = %self.shared.name, "mainloop start requested");
        self.producer.wake(Request::Start)
    }

    /// Stop the loop after the task currently executing, if any. Idempotent.
    pub fn stop(&self) -> Result<(), MainloopError> {
        if self.shared.mark_stopped() == LoopState::Stopped {
            return Ok(());
        }
        info!(mainloop = %self.shared.name, "mainloop stop requested");
        self.producer.wake(Request::Stop)
    }

    /// Run `task(ctx)` every `period_ms`, first after `initial_delay_ms`.
    pub fn add_periodic_task<C>(
        &self,
        name: &str,
        task: TaskFn<C>,
        ctx: Arc<C>,
        priority: Priority,
        period_ms: u32,
        initial_delay_ms: u32,
    ) -> Result<TaskId, MainloopError>
    where
        C: Send + Sync + 'static,
    {
        if period_ms == 0 {
            return Err(MainloopError::InvalidArgument(format!(
                "periodic task '{name}' needs a non-zero period"
            )));
        }
        let next_due_at = timing::initial_due(self.now_ms(), initial_delay_ms);
        self.submit(
            name,
            priority,
            Timing::Periodic { period_ms, next_due_at },
            Callback::new(task, ctx),
            None,
        )
    }

    /// Run `task(ctx)` once, `delay_ms` from now.
    pub fn add_one_shot_task<C>(
        &self,
        name: &str,
        task: TaskFn<C>,
        ctx: Arc<C>,
        priority: Priority,
        delay_ms: u32,
    ) -> Result<TaskId, MainloopError>
    where
        C: Send + Sync + 'static,
    {
        let next_due_at = timing::initial_due(self.now_ms(), delay_ms);
        self.submit(
            name,
            priority,
            Timing::OneShot { next_due_at },
            Callback::new(task, ctx),
            None,
        )
    }

    /// Run `task(ctx)` whenever the loop has been quiet for the idle interval.
    pub fn add_idle_task<C>(
        &self,
        name: &str,
        task: TaskFn<C>,
        priority: Priority,
        ctx: Arc<C>,
    ) -> Result<TaskId, MainloopError>
    where
        C: Send + Sync + 'static,
    {
        self.submit(
            name,
            priority,
            Timing::Idle { last_run_at: None },
            Callback::new(task, ctx),
            None,
        )
    }

    /// Run `task(ctx)` exactly once on the owner thread at the next safepoint,
    /// ahead of any timed task.
    pub fn execute_task<C>(
        &self,
        name: &str,
        task: TaskFn<C>,
        priority: Priority,
        ctx: Arc<C>,
    ) -> Result<TaskId, MainloopError>
    where
        C: Send + Sync + 'static,
    {
        self.submit(name, priority, Timing::Immediate, Callback::new(task, ctx), None)
    }

    pub fn remove_periodic_task(
        &self,
        identifier: impl Into<TaskSelector>,
    ) -> Result<(), MainloopError> {
        self.remove(Some(TaskKind::Periodic), identifier.into())
    }

    pub fn remove_one_shot_task(
        &self,
        identifier: impl Into<TaskSelector>,
    ) -> Result<(), MainloopError> {
        self.remove(Some(TaskKind::OneShot), identifier.into())
    }

    pub fn remove_idle_task(&self, identifier: impl Into<TaskSelector>) -> Result<(), MainloopError> {
        self.remove(Some(TaskKind::Idle), identifier.into())
    }

    /// Remove a task of any kind by the handle its add call returned.
    pub fn remove_task(&self, id: TaskId) -> Result<(), MainloopError> {
        self.remove(None, TaskSelector::Id(id))
    }

    /// Insert an event-bridge anchor record and return its dispatch gate.
    pub fn register_bridge(
        &self,
        name: &str,
        priority: Priority,
    ) -> Result<BridgeLink, MainloopError> {
        self.reserve_slot(name)?;
        let id = self.shared.allocate_id();
        let link = BridgeLink::new(id);
        let record = TaskRecord::new(id, name, priority, Timing::EventBridge, Callback::noop());
        self.enqueue_add(record)?;
        Ok(link)
    }

    /// Queue one delivery for a bridge registration. The job runs once on
    /// the owner thread unless the registration is closed first.
    pub fn dispatch_bridged<F>(
        &self,
        link: &BridgeLink,
        name: &str,
        priority: Priority,
        job: F,
    ) -> Result<TaskId, MainloopError>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        if !link.is_open() {
            return Err(MainloopError::InvalidState(format!(
                "event bridge {} is unregistered",
                link.id()
            )));
        }
        let mut job = Some(job);
        let callback = Callback::from_fn(move || job.take().map_or(Ok(()), |f| f()));
        self.submit(name, priority, Timing::Immediate, callback, Some(link.clone()))
    }

    /// Close the gate, then remove the anchor and every queued dispatch.
    ///
    /// If the removal cannot be queued the gate is reopened and the
    /// registration stays as it was, so the call can be retried.
    pub fn unregister_bridge(&self, link: &BridgeLink) -> Result<(), MainloopError> {
        link.close();
        let removed = self.remove(Some(TaskKind::EventBridge), TaskSelector::Id(link.id()));
        if let Err(e) = &removed {
            link.reopen();
            warn!(mainloop = %self.shared.name, bridge = %link.id(), "unregister not queued: {}", e);
        }
        removed
    }

    fn submit(
        &self,
        name: &str,
        priority: Priority,
        timing: Timing,
        callback: Callback,
        link: Option<BridgeLink>,
    ) -> Result<TaskId, MainloopError> {
        self.reserve_slot(name)?;
        let id = self.shared.allocate_id();
        let mut record = TaskRecord::new(id, name, priority, timing, callback);
        if let Some(link) = link {
            record = record.with_link(link);
        }
        self.enqueue_add(record)?;
        Ok(id)
    }

    fn reserve_slot(&self, name: &str) -> Result<(), MainloopError> {
        self.shared.slots.try_reserve().map_err(|e| {
            warn!(mainloop = %self.shared.name, task = %name, "task rejected: {}", e);
            e
        })
    }

    /// Enqueue an Add whose slot is already reserved.
    fn enqueue_add(&self, record: TaskRecord) -> Result<(), MainloopError> {
        let (id, kind, priority) = (record.id(), record.kind(), record.priority());
        let name = record.name().to_string();
        if let Err(e) = self.producer.submit(Request::Add(record)) {
            self.shared.slots.release(1);
            warn!(mainloop = %self.shared.name, task = %name, "task rejected: {}", e);
            return Err(e);
        }
        debug!(mainloop = %self.shared.name, task = %name, %id, ?kind, priority, "add queued");
        Ok(())
    }

    fn remove(&self, kind: Option<TaskKind>, selector: TaskSelector) -> Result<(), MainloopError> {
        debug!(mainloop = %self.shared.name, %selector, ?kind, "remove queued");
        self.producer.submit(Request::Remove { kind, selector })
    }
}
