use std::path::Path;

use anyhow::{bail, Context, Result};
use mainloop::{MainloopConfig, Priority};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Runner configuration loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Scheduler sizing; `MAINLOOP_*` env vars override it.
    #[serde(default)]
    pub mainloop: MainloopConfig,

    /// Interval of the demo event producer; 0 disables it.
    #[serde(default = "default_event_interval_ms")]
    pub event_interval_ms: u64,

    /// Demo tasks registered before the loop starts.
    #[serde(default = "default_tasks")]
    pub tasks: Vec<TaskSpec>,
}

/// Which mainloop registration call a demo task uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemoKind {
    Periodic,
    OneShot,
    Idle,
}

/// One `[[tasks]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub kind: DemoKind,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub period_ms: u32,
    #[serde(default)]
    pub delay_ms: u32,
}

fn default_event_interval_ms() -> u64 {
    250
}

fn default_tasks() -> Vec<TaskSpec> {
    vec![
        TaskSpec {
            name: "heartbeat".into(),
            kind: DemoKind::Periodic,
            priority: 1,
            period_ms: 500,
            delay_ms: 0,
        },
        TaskSpec {
            name: "boot".into(),
            kind: DemoKind::OneShot,
            priority: 0,
            period_ms: 0,
            delay_ms: 100,
        },
        TaskSpec {
            name: "housekeeping".into(),
            kind: DemoKind::Idle,
            priority: 9,
            period_ms: 0,
            delay_ms: 0,
        },
    ]
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mainloop: MainloopConfig::default(),
            event_interval_ms: default_event_interval_ms(),
            tasks: default_tasks(),
        }
    }
}

impl RunnerConfig {
    /// Load from `path`, or use the built-in demo when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                debug!(path = %path.display(), "loaded runner config");
                Self::from_toml(&content)
                    .with_context(|| format!("invalid config in {}", path.display()))?
            }
            None => Self::default(),
        };
        config.mainloop.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.mainloop.validate()?;
        for task in &self.tasks {
            if task.name.trim().is_empty() {
                bail!("task names must not be empty");
            }
            if task.kind == DemoKind::Periodic && task.period_ms == 0 {
                bail!("periodic task '{}' needs period_ms > 0", task.name);
            }
        }
        if self.tasks.len() + usize::from(self.event_interval_ms > 0) > self.mainloop.max_tasks {
            bail!(
                "{} demo tasks do not fit in max_tasks = {}",
                self.tasks.len(),
                self.mainloop.max_tasks
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tasks_and_section() {
        let toml = r#"
event_interval_ms = 0

[mainloop]
name = "demo"
max_tasks = 4
idle_interval_ms = 200

[[tasks]]
name = "blink"
kind = "periodic"
priority = 2
period_ms = 50

[[tasks]]
name = "once"
kind = "one_shot"
delay_ms = 10
"#;
        let cfg = RunnerConfig::from_toml(toml).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.mainloop.name, "demo");
        assert_eq!(cfg.mainloop.max_tasks, 4);
        assert_eq!(cfg.mainloop.queue_capacity, 64);
        assert_eq!(cfg.event_interval_ms, 0);
        assert_eq!(cfg.tasks.len(), 2);
        assert_eq!(cfg.tasks[0].kind, DemoKind::Periodic);
        assert_eq!(cfg.tasks[1].kind, DemoKind::OneShot);
        assert_eq!(cfg.tasks[1].priority, 0);
    }

    #[test]
    fn empty_file_gives_demo_defaults() {
        let cfg = RunnerConfig::from_toml("").unwrap();
        assert_eq!(cfg.tasks, default_tasks());
        assert_eq!(cfg.event_interval_ms, 250);
        cfg.validate().unwrap();
    }

    #[test]
    fn periodic_without_period_rejected() {
        let toml = r#"
[[tasks]]
name = "spin"
kind = "periodic"
"#;
        let err = RunnerConfig::from_toml(toml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("spin"), "got: {err}");
    }

    #[test]
    fn too_many_tasks_rejected() {
        let toml = r#"
[mainloop]
max_tasks = 2
"#;
        let err = RunnerConfig::from_toml(toml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("max_tasks"), "got: {err}");
    }

    #[test]
    fn unknown_kind_is_parse_error() {
        let toml = r#"
[[tasks]]
name = "x"
kind = "sometimes"
"#;
        assert!(RunnerConfig::from_toml(toml).is_err());
    }
}
