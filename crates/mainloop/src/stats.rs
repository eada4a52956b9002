use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-task counters, keyed by task name in [`MainloopStats::tasks`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskStats {
    pub executions: u64,
    /// Runs that returned an error or panicked.
    pub faults: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
    pub last_run: Option<DateTime<Utc>>,
}

impl TaskStats {
    pub fn mean_duration(&self) -> Duration {
        if self.executions == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_duration.as_nanos() / u128::from(self.executions);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Owner-side counters describing what the loop has done so far.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MainloopStats {
    pub tasks: HashMap<String, TaskStats>,
    pub total_executions: u64,
    pub faults: u64,
    /// Bridged dispatches the owner discarded because their registration
    /// was closed. Deliveries refused on the bus side never reach the owner
    /// and are counted by the bridge instead.
    pub dropped_dispatches: u64,
    /// Removal requests that matched a task.
    pub removals: u64,
    /// Removal requests that matched nothing.
    pub unmatched_removals: u64,
}

impl MainloopStats {
    /// Account one callback invocation of `task_name`.
    pub fn record_execution(&mut self, task_name: &str, duration: Duration, faulted: bool) {
        let task = self.tasks.entry(task_name.to_string()).or_default();
        task.executions += 1;
        task.total_duration += duration;
        task.max_duration = task.max_duration.max(duration);
        task.last_run = Some(Utc::now());
        self.total_executions += 1;
        if faulted {
            task.faults += 1;
            self.faults += 1;
        }
    }

    pub fn record_dropped_dispatches(&mut self, count: usize) {
        self.dropped_dispatches += count as u64;
    }

    pub fn record_removal(&mut self, matched: bool) {
        if matched {
            self.removals += 1;
        } else {
            self.unmatched_removals += 1;
        }
    }

    pub fn task(&self, task_name: &str) -> Option<&TaskStats> {
        self.tasks.get(task_name)
    }

    /// Invocations recorded for `task_name`.
    pub fn executions_of(&self, task_name: &str) -> u64 {
        self.task(task_name).map_or(0, |t| t.executions)
    }
}
