//! Task records and the selectors used to find them again.
//!
//! A [`TaskRecord`] is built on the submitting thread, travels through the
//! mutation queue and is owned by the task table from then on. Its callback
//! is type-erased at registration so the table can hold every kind of task
//! side by side.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TaskResult;
use crate::timing::Millis;

/// Execution rank. Lower value = runs first.
pub type Priority = u8;

/// Callback signature shared by every registration entry point.
///
/// Capture-less closures coerce to this, e.g. `|c: &Counter| c.bump()`.
pub type TaskFn<C> = fn(&C) -> TaskResult;

type Job = Box<dyn FnMut() -> TaskResult + Send>;

/// Handle returned by every add call.
///
/// Handles are allocated in submission order, which makes them the FIFO
/// tie-breaker among tasks of equal priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw handle value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// The kinds of work the mainloop knows how to schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Periodic,
    OneShot,
    Idle,
    Immediate,
    EventBridge,
}

/// Per-kind timing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    Periodic { period_ms: u32, next_due_at: Millis },
    OneShot { next_due_at: Millis },
    /// `last_run_at` is when this idle task last finished.
    Idle { last_run_at: Option<Millis> },
    Immediate,
    /// Anchor record for an event-bus subscription. Never due itself.
    EventBridge,
}

impl Timing {
    pub fn kind(&self) -> TaskKind {
        match self {
            Timing::Periodic { .. } => TaskKind::Periodic,
            Timing::OneShot { .. } => TaskKind::OneShot,
            Timing::Idle { .. } => TaskKind::Idle,
            Timing::Immediate => TaskKind::Immediate,
            Timing::EventBridge => TaskKind::EventBridge,
        }
    }
}

/// A callable plus the identity it was registered with.
pub struct Callback {
    job: Job,
    callback_addr: Option<usize>,
    context_addr: Option<usize>,
}

impl Callback {
    /// Bind a callback to its context.
    pub fn new<C>(callback: TaskFn<C>, context: Arc<C>) -> Self
    where
        C: Send + Sync + 'static,
    {
        Self {
            callback_addr: Some(callback as usize),
            context_addr: Some(context_addr(&context)),
            job: Box::new(move || callback(&context)),
        }
    }

    /// Wrap an arbitrary closure. It can only be removed by id or name.
    pub fn from_fn<F>(job: F) -> Self
    where
        F: FnMut() -> TaskResult + Send + 'static,
    {
        Self {
            job: Box::new(job),
            callback_addr: None,
            context_addr: None,
        }
    }

    /// A callback that does nothing. Used by event-bridge anchor records.
    pub(crate) fn noop() -> Self {
        Self::from_fn(|| Ok(()))
    }

    pub(crate) fn invoke(&mut self) -> TaskResult {
        (self.job)()
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("callback_addr", &self.callback_addr)
            .field("context_addr", &self.context_addr)
            .finish_non_exhaustive()
    }
}

fn context_addr<C>(context: &Arc<C>) -> usize {
    Arc::as_ptr(context) as *const () as usize
}

/// Open/closed flag shared between an event-bridge registration and the
/// dispatches it produced. Closing it drops every dispatch that has not
/// started yet.
#[derive(Debug, Clone)]
pub struct BridgeLink {
    id: TaskId,
    open: Arc<AtomicBool>,
}

impl BridgeLink {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            id,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Id of the `EventBridge` anchor record.
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub(crate) fn reopen(&self) {
        self.open.store(true, Ordering::Release);
    }
}

/// One unit of work as held by the task table.
#[derive(Debug)]
pub struct TaskRecord {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) priority: Priority,
    pub(crate) timing: Timing,
    pub(crate) callback: Callback,
    /// Event-bridge anchor a dispatch belongs to.
    pub(crate) link: Option<BridgeLink>,
}

impl TaskRecord {
    pub(crate) fn new(
        id: TaskId,
        name: impl Into<String>,
        priority: Priority,
        timing: Timing,
        callback: Callback,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            priority,
            timing,
            callback,
            link: None,
        }
    }

    pub(crate) fn with_link(mut self, link: BridgeLink) -> Self {
        self.link = Some(link);
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn kind(&self) -> TaskKind {
        self.timing.kind()
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// The event-bridge anchor this dispatch hangs off, if any.
    pub fn parent(&self) -> Option<TaskId> {
        self.link.as_ref().map(BridgeLink::id)
    }

    /// False once the owning bridge registration was unregistered.
    pub(crate) fn is_live(&self) -> bool {
        self.link.as_ref().map_or(true, BridgeLink::is_open)
    }

    /// Table ordering key: priority, then registration order.
    pub(crate) fn order_key(&self) -> (Priority, TaskId) {
        (self.priority, self.id)
    }
}

/// Best-effort identifier for removals.
///
/// Name, callback and context selectors are ambiguous when several tasks
/// share them; the first match in priority order is removed. Prefer
/// [`TaskSelector::Id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSelector {
    Id(TaskId),
    Name(String),
    Callback(usize),
    Context(usize),
}

impl TaskSelector {
    /// Match tasks registered with this callback function.
    pub fn callback<C>(callback: TaskFn<C>) -> Self {
        Self::Callback(callback as usize)
    }

    /// Match tasks registered with this exact context allocation.
    pub fn context<C>(context: &Arc<C>) -> Self {
        Self::Context(context_addr(context))
    }

    pub fn matches(&self, record: &TaskRecord) -> bool {
        match self {
            TaskSelector::Id(id) => record.id == *id,
            TaskSelector::Name(name) => record.name == *name,
            TaskSelector::Callback(addr) => record.callback.callback_addr == Some(*addr),
            TaskSelector::Context(addr) => record.callback.context_addr == Some(*addr),
        }
    }
}

impl From<TaskId> for TaskSelector {
    fn from(id: TaskId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for TaskSelector {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for TaskSelector {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for TaskSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskSelector::Id(id) => write!(f, "{id}"),
            TaskSelector::Name(name) => write!(f, "name={name}"),
            TaskSelector::Callback(addr) => write!(f, "callback={addr:#x}"),
            TaskSelector::Context(addr) => write!(f, "context={addr:#x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;

    struct Sensor;

    fn sample(_: &Sensor) -> TaskResult {
        Ok(())
    }

    fn calibrate(_: &Sensor) -> TaskResult {
        Err(TaskError::failed("not calibrated"))
    }

    fn record(id: u64, callback: Callback) -> TaskRecord {
        TaskRecord::new(TaskId::new(id), "sensor", 3, Timing::Immediate, callback)
    }

    #[test]
    fn selector_matches_callback_identity() {
        let ctx = Arc::new(Sensor);
        let rec = record(1, Callback::new(sample, ctx));

        assert!(TaskSelector::callback(sample).matches(&rec));
        assert!(!TaskSelector::callback(calibrate).matches(&rec));
    }

    #[test]
    fn selector_matches_context_identity() {
        let ctx = Arc::new(Sensor);
        let other = Arc::new(Sensor);
        let rec = record(1, Callback::new(sample, Arc::clone(&ctx)));

        assert!(TaskSelector::context(&ctx).matches(&rec));
        assert!(!TaskSelector::context(&other).matches(&rec));
    }

    #[test]
    fn closure_callbacks_only_match_by_id_or_name() {
        let rec = record(7, Callback::from_fn(|| Ok(())));

        assert!(TaskSelector::from(TaskId::new(7)).matches(&rec));
        assert!(TaskSelector::from("sensor").matches(&rec));
        assert!(!TaskSelector::Callback(0).matches(&rec));
        assert!(!TaskSelector::Context(0).matches(&rec));
    }

    #[test]
    fn invoke_runs_bound_callback() {
        let mut cb = Callback::new(calibrate, Arc::new(Sensor));
        assert_eq!(cb.invoke(), Err(TaskError::failed("not calibrated")));
    }

    #[test]
    fn closed_link_marks_dispatch_dead() {
        let link = BridgeLink::new(TaskId::new(1));
        let rec = record(2, Callback::noop()).with_link(link.clone());

        assert!(rec.is_live());
        assert_eq!(rec.parent(), Some(TaskId::new(1)));
        link.close();
        assert!(!rec.is_live());
    }

    #[test]
    fn timing_reports_kind() {
        assert_eq!(
            Timing::Periodic { period_ms: 10, next_due_at: 0 }.kind(),
            TaskKind::Periodic
        );
        assert_eq!(Timing::Idle { last_run_at: None }.kind(), TaskKind::Idle);
        assert_eq!(Timing::EventBridge.kind(), TaskKind::EventBridge);
    }
}
