//! Task queue error model.

use thiserror::Error;

/// Result type used by the task queue API.
pub type TaskQueueResult<T> = Result<T, TaskQueueError>;

/// Errors surfaced synchronously to callers of the task queue.
///
/// Failures raised by a job's own action never show up here: they are
/// recorded on the job and visible through its status snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskQueueError {
    /// Per-job submission options failed validation (e.g. a zero timeout).
    #[error("invalid job configuration: {0}")]
    InvalidJobConfiguration(String),

    /// Queue-level configuration is unusable (e.g. zero workers).
    #[error("invalid queue configuration: {0}")]
    InvalidQueueConfiguration(String),

    /// The queue has not been started, or was stopped.
    #[error("task queue is not running")]
    NotRunning,

    /// A job identifier could not be parsed.
    #[error("invalid job id: {0}")]
    InvalidJobId(String),
}

impl TaskQueueError {
    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJobConfiguration(msg.into())
    }

    pub fn invalid_queue(msg: impl Into<String>) -> Self {
        Self::InvalidQueueConfiguration(msg.into())
    }
}

/// Configuration loading error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting was present but could not be used.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid_value(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for TaskQueueError {
    fn from(err: ConfigError) -> Self {
        Self::InvalidQueueConfiguration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts_into_queue_configuration_error() {
        let err: TaskQueueError =
            ConfigError::invalid_value("DBSBM_TASK_QUEUE_MAX_WORKERS", "many", "not a number")
                .into();

        match err {
            TaskQueueError::InvalidQueueConfiguration(msg) => {
                assert!(msg.contains("DBSBM_TASK_QUEUE_MAX_WORKERS"));
                assert!(msg.contains("\"many\""));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
