//! Engine configuration.
//!
//! [`EngineConfig`] can be built from defaults, overridden from environment
//! variables, or loaded from a YAML / JSON / TOML file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dsl::DslFormat;
use crate::error::WorkflowError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Node starts allowed per run.
    pub max_execution_steps: u32,
    /// Wall-clock budget per run, in seconds.
    pub max_execution_time_secs: u64,
    pub min_workers: usize,
    pub max_workers: usize,
    /// Queue depth above which the pool adds a worker.
    pub scale_up_threshold: usize,
    /// Idle time after which a surplus worker retires, in seconds.
    pub scale_down_idle_time_secs: f64,
    pub scale_check_interval_ms: u64,
    pub dispatcher_poll_interval_ms: u64,
    /// Bound for joining each worker and the dispatcher at shutdown.
    pub join_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_execution_steps: 500,
            max_execution_time_secs: 600,
            min_workers: 1,
            max_workers: 10,
            scale_up_threshold: 3,
            scale_down_idle_time_secs: 5.0,
            scale_check_interval_ms: 1000,
            dispatcher_poll_interval_ms: 100,
            join_timeout_ms: 2000,
        }
    }
}

pub const ENV_MIN_WORKERS: &str = "GRAPH_ENGINE_MIN_WORKERS";
pub const ENV_MAX_WORKERS: &str = "GRAPH_ENGINE_MAX_WORKERS";
pub const ENV_SCALE_UP_THRESHOLD: &str = "GRAPH_ENGINE_SCALE_UP_THRESHOLD";
pub const ENV_SCALE_DOWN_IDLE_TIME: &str = "GRAPH_ENGINE_SCALE_DOWN_IDLE_TIME";
pub const ENV_MAX_EXECUTION_STEPS: &str = "WORKFLOW_MAX_EXECUTION_STEPS";
pub const ENV_MAX_EXECUTION_TIME: &str = "WORKFLOW_MAX_EXECUTION_TIME";

impl EngineConfig {
    /// Defaults overridden by any of the `GRAPH_ENGINE_*` / `WORKFLOW_MAX_*`
    /// environment variables that are set.
    pub fn from_env() -> Result<Self, WorkflowError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, WorkflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, ENV_MIN_WORKERS)? {
            self.min_workers = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_MAX_WORKERS)? {
            self.max_workers = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_SCALE_UP_THRESHOLD)? {
            self.scale_up_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_SCALE_DOWN_IDLE_TIME)? {
            self.scale_down_idle_time_secs = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_MAX_EXECUTION_STEPS)? {
            self.max_execution_steps = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_MAX_EXECUTION_TIME)? {
            self.max_execution_time_secs = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Load from a config file; the format follows the extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        let path = path.as_ref();
        let format = DslFormat::from_path(path).ok_or_else(|| {
            WorkflowError::ConfigError(format!(
                "Unsupported config file extension: {}",
                path.display()
            ))
        })?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            WorkflowError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: EngineConfig = match format {
            DslFormat::Yaml => serde_yaml::from_str(&content)
                .map_err(|e| WorkflowError::ConfigError(e.to_string()))?,
            DslFormat::Json => serde_json::from_str(&content)
                .map_err(|e| WorkflowError::ConfigError(e.to_string()))?,
            DslFormat::Toml => {
                toml::from_str(&content).map_err(|e| WorkflowError::ConfigError(e.to_string()))?
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.min_workers == 0 {
            return Err(WorkflowError::ConfigError(
                "min_workers must be at least 1".into(),
            ));
        }
        if self.min_workers > self.max_workers {
            return Err(WorkflowError::ConfigError(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if !self.scale_down_idle_time_secs.is_finite() || self.scale_down_idle_time_secs < 0.0 {
            return Err(WorkflowError::ConfigError(
                "scale_down_idle_time_secs must be a finite, non-negative number".into(),
            ));
        }
        if self.dispatcher_poll_interval_ms == 0 {
            return Err(WorkflowError::ConfigError(
                "dispatcher_poll_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn max_execution_time(&self) -> Duration {
        Duration::from_secs(self.max_execution_time_secs)
    }

    pub fn scale_down_idle_time(&self) -> Duration {
        Duration::try_from_secs_f64(self.scale_down_idle_time_secs.max(0.0))
            .unwrap_or(Duration::MAX)
    }

    pub fn scale_check_interval(&self) -> Duration {
        Duration::from_millis(self.scale_check_interval_ms)
    }

    pub fn dispatcher_poll_interval(&self) -> Duration {
        Duration::from_millis(self.dispatcher_poll_interval_ms.max(1))
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, WorkflowError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            WorkflowError::ConfigError(format!("Invalid value for {}: {} ({})", key, raw, e))
        }),
    }
}
