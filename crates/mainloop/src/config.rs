use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MainloopError;

/// Mainloop settings.
///
/// Parsed from TOML with support for `MAINLOOP_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainloopConfig {
    /// Display name used in logs.
    #[serde(default = "default_name")]
    pub name: String,

    /// Maximum number of task records held at once.
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,

    /// Quiet time required before an idle task may fire.
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u32,

    /// Bound of the cross-thread request queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Return from `run` once no task is left and nothing is pending.
    #[serde(default)]
    pub exit_when_idle: bool,
}

fn default_name() -> String {
    "mainloop".into()
}

fn default_max_tasks() -> usize {
    32
}

fn default_idle_interval_ms() -> u32 {
    1000
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for MainloopConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            max_tasks: default_max_tasks(),
            idle_interval_ms: default_idle_interval_ms(),
            queue_capacity: default_queue_capacity(),
            exit_when_idle: false,
        }
    }
}

impl MainloopConfig {
    /// Config with the given sizing and defaults for everything else.
    pub fn new(name: impl Into<String>, max_tasks: usize, idle_interval_ms: u32) -> Self {
        Self {
            name: name.into(),
            max_tasks,
            idle_interval_ms,
            ..Self::default()
        }
    }

    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, MainloopError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MainloopError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Apply environment variable overrides.
    ///
    /// - `MAINLOOP_NAME` -> `name`
    /// - `MAINLOOP_MAX_TASKS` -> `max_tasks`
    /// - `MAINLOOP_IDLE_INTERVAL_MS` -> `idle_interval_ms`
    /// - `MAINLOOP_QUEUE_CAPACITY` -> `queue_capacity`
    /// - `MAINLOOP_EXIT_WHEN_IDLE` -> `exit_when_idle`
    ///
    /// Unparseable numeric values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MAINLOOP_NAME") {
            self.name = v;
        }
        if let Some(n) = env_parse("MAINLOOP_MAX_TASKS") {
            self.max_tasks = n;
        }
        if let Some(n) = env_parse("MAINLOOP_IDLE_INTERVAL_MS") {
            self.idle_interval_ms = n;
        }
        if let Some(n) = env_parse("MAINLOOP_QUEUE_CAPACITY") {
            self.queue_capacity = n;
        }
        if let Some(b) = env_parse("MAINLOOP_EXIT_WHEN_IDLE") {
            self.exit_when_idle = b;
        }
    }

    pub fn validate(&self) -> Result<(), MainloopError> {
        if self.name.trim().is_empty() {
            return Err(MainloopError::Config("name must not be empty".into()));
        }
        if self.max_tasks == 0 {
            return Err(MainloopError::Config(format!(
                "mainloop '{}': max_tasks must be at least 1",
                self.name
            )));
        }
        if self.queue_capacity == 0 {
            return Err(MainloopError::Config(format!(
                "mainloop '{}': queue_capacity must be at least 1",
                self.name
            )));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
