//! Configuration loading and representation.
//!
//! The queue is configured programmatically; `from_env` is a convenience for
//! hosts that want to override the defaults from the environment.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use dbsbm_core::ConfigError;

pub const ENV_MAX_WORKERS: &str = "DBSBM_TASK_QUEUE_MAX_WORKERS";
pub const ENV_MAX_QUEUE_SIZE: &str = "DBSBM_TASK_QUEUE_MAX_SIZE";
pub const ENV_DEFAULT_MAX_RETRIES: &str = "DBSBM_TASK_QUEUE_MAX_RETRIES";
pub const ENV_CLEANUP_INTERVAL_SECS: &str = "DBSBM_TASK_QUEUE_CLEANUP_INTERVAL_SECS";
pub const ENV_RETENTION_HOURS: &str = "DBSBM_TASK_QUEUE_RETENTION_HOURS";

const SECS_PER_HOUR: u64 = 60 * 60;

/// Task queue configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Name for logging
    pub name: String,
    /// Number of worker loops (fixed for the lifetime of a run)
    pub max_workers: usize,
    /// Maximum number of queued, not yet claimed jobs
    pub max_queue_size: usize,
    /// Retry ceiling for submissions that don't set one
    pub default_max_retries: u32,
    /// How often the background sweep evicts finished jobs
    pub cleanup_interval: Duration,
    /// How long finished jobs stay queryable
    pub job_retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "task-queue".to_string(),
            max_workers: 4,
            max_queue_size: 1000,
            default_max_retries: 3,
            cleanup_interval: Duration::from_secs(SECS_PER_HOUR),
            job_retention: Duration::from_secs(24 * SECS_PER_HOUR),
        }
    }
}

impl QueueConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = max;
        self
    }

    pub fn with_default_max_retries(mut self, max: u32) -> Self {
        self.default_max_retries = max;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_job_retention(mut self, retention: Duration) -> Self {
        self.job_retention = retention;
        self
    }

    /// Defaults overridden by `DBSBM_TASK_QUEUE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(workers) = parse_var(&lookup, ENV_MAX_WORKERS)? {
            config.max_workers = workers;
        }
        if let Some(size) = parse_var(&lookup, ENV_MAX_QUEUE_SIZE)? {
            config.max_queue_size = size;
        }
        if let Some(retries) = parse_var(&lookup, ENV_DEFAULT_MAX_RETRIES)? {
            config.default_max_retries = retries;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_CLEANUP_INTERVAL_SECS)? {
            config.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(hours) = parse_var::<u64>(&lookup, ENV_RETENTION_HOURS)? {
            config.job_retention = Duration::from_secs(hours.saturating_mul(SECS_PER_HOUR));
        }

        config.validate()?;
        Ok(config)
    }

    /// Convenience for tests and embedding: look keys up in a map.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Reject settings the queue cannot be built with.
    ///
    /// `max_workers` is checked when the queue starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::invalid_value(
                "max_queue_size",
                "0",
                "must be greater than zero",
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::invalid_value(
                "cleanup_interval",
                "0s",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };

    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::invalid_value(key, raw.clone(), e.to_string()))
}
