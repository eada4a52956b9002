//! Bounded, priority-ordered container of task records.
//!
//! Only the owner thread touches a [`TaskTable`], synchronously, after it
//! has drained the mutation queue.

use crate::error::MainloopError;
use crate::task::{TaskId, TaskKind, TaskRecord, TaskSelector};
use crate::timing::{self, IdleWindow, Millis};

/// Task records kept sorted by `(priority, registration order)`.
#[derive(Debug)]
pub struct TaskTable {
    capacity: usize,
    tasks: Vec<TaskRecord>,
}

impl TaskTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tasks: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tasks.len() >= self.capacity
    }

    /// Insert in priority order. Fails without evicting when full.
    pub fn insert(&mut self, record: TaskRecord) -> Result<TaskId, MainloopError> {
        if self.is_full() {
            return Err(MainloopError::table_full(self.capacity));
        }
        let key = record.order_key();
        let pos = self.tasks.partition_point(|t| t.order_key() < key);
        let id = record.id;
        self.tasks.insert(pos, record);
        Ok(id)
    }

    /// Remove the first record, in priority order, matching `selector`
    /// (and `kind`, when given).
    pub fn remove(&mut self, kind: Option<TaskKind>, selector: &TaskSelector) -> Option<TaskRecord> {
        let pos = self
            .tasks
            .iter()
            .position(|t| kind.map_or(true, |k| t.kind() == k) && selector.matches(t))?;
        Some(self.tasks.remove(pos))
    }

    pub fn remove_id(&mut self, id: TaskId) -> Option<TaskRecord> {
        let pos = self.position(id)?;
        Some(self.tasks.remove(pos))
    }

    /// Remove every dispatch hanging off the given event-bridge anchor.
    pub fn remove_children(&mut self, parent: TaskId) -> Vec<TaskRecord> {
        let mut removed = Vec::new();
        let mut i = 0;
        while i < self.tasks.len() {
            if self.tasks[i].parent() == Some(parent) {
                removed.push(self.tasks.remove(i));
            } else {
                i += 1;
            }
        }
        removed
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskRecord> {
        self.position(id).map(|pos| &self.tasks[pos])
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut TaskRecord> {
        let pos = self.position(id)?;
        Some(&mut self.tasks[pos])
    }

    /// All records in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.iter()
    }

    /// Timed and immediate tasks due at `now`, in priority order.
    pub fn iter_due(&self, now: Millis) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks
            .iter()
            .filter(move |t| timing::is_due(&t.timing, now))
            .map(|t| t.id)
    }

    /// Pick the single task to run next.
    ///
    /// Immediate tasks bypass timing and win over everything else. Otherwise
    /// the highest-priority due timed task runs. Idle tasks are considered
    /// only when nothing else is due.
    pub fn next_runnable(&self, now: Millis, window: &IdleWindow) -> Option<TaskId> {
        if let Some(t) = self.tasks.iter().find(|t| t.kind() == TaskKind::Immediate) {
            return Some(t.id);
        }
        if let Some(id) = self.iter_due(now).next() {
            return Some(id);
        }
        self.tasks
            .iter()
            .find(|t| timing::idle_ready(&t.timing, window, now))
            .map(|t| t.id)
    }

    /// Earliest instant any record wants the loop awake.
    pub fn next_deadline(&self, window: &IdleWindow) -> Option<Millis> {
        self.tasks
            .iter()
            .filter_map(|t| timing::wake_at(&t.timing, window))
            .min()
    }

    fn position(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }
}
