use std::fmt;

use thiserror::Error;

/// Which bounded resource rejected a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// The owner-side table of registered tasks.
    TaskTable,
    /// The cross-thread inbox feeding the owner thread.
    MutationQueue,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::TaskTable => f.write_str("task table"),
            Resource::MutationQueue => f.write_str("mutation queue"),
        }
    }
}

/// Errors returned by the mainloop API.
#[derive(Debug, Error)]
pub enum MainloopError {
    #[error("{resource} full (capacity {capacity})")]
    CapacityExceeded { resource: Resource, capacity: usize },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}

impl MainloopError {
    pub(crate) fn table_full(capacity: usize) -> Self {
        Self::CapacityExceeded {
            resource: Resource::TaskTable,
            capacity,
        }
    }

    pub(crate) fn queue_full(capacity: usize) -> Self {
        Self::CapacityExceeded {
            resource: Resource::MutationQueue,
            capacity,
        }
    }

    /// Whether this error is a capacity rejection (table or queue).
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}

/// Failure reported by (or caught around) a task callback.
///
/// The loop logs these and keeps running; they never reach the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Convenience constructor for callbacks.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Lets callbacks use `?` on handle calls made from inside a task.
impl From<MainloopError> for TaskError {
    fn from(e: MainloopError) -> Self {
        Self::Failed(e.to_string())
    }
}

/// Return type of every task callback.
pub type TaskResult = Result<(), TaskError>;
