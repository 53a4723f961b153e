//! Core job types and submission options.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dbsbm_core::{JobId, TaskQueueError};

/// Value produced by a successful job.
pub type TaskOutput = serde_json::Value;

/// Boxed future returned by an async job action.
pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<TaskOutput>> + Send + 'static>>;

type SyncFn = dyn Fn() -> anyhow::Result<TaskOutput> + Send + Sync + 'static;
type AsyncFn = dyn Fn() -> TaskFuture + Send + Sync + 'static;

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting for a worker
    Pending,
    /// Claimed by a worker
    Running,
    /// Finished successfully
    Completed,
    /// Retries exhausted or timed out
    Failed,
    /// Cancelled before a worker claimed it
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The work a job performs, tagged by how it has to be executed.
///
/// Arguments are captured by the closure at submission time. The closure is
/// `Fn` because a retry invokes it again.
#[derive(Clone)]
pub enum TaskAction {
    /// Blocking closure, run on the blocking thread pool.
    Sync(Arc<SyncFn>),
    /// Closure producing a future, awaited by the worker.
    Async(Arc<AsyncFn>),
}

impl TaskAction {
    /// Wrap a blocking closure.
    pub fn sync_fn<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<TaskOutput> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wrap a closure returning a future.
    pub fn async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<TaskOutput>> + Send + 'static,
    {
        Self::Async(Arc::new(move || -> TaskFuture { Box::pin(f()) }))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TaskAction::Sync(_) => "sync",
            TaskAction::Async(_) => "async",
        }
    }
}

impl fmt::Debug for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskAction").field(&self.kind()).finish()
    }
}

/// Per-submission options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOptions {
    /// Lower values are served first.
    pub priority: i64,
    /// Wall-clock limit for one attempt. `None` means unlimited.
    pub timeout: Option<Duration>,
    /// Retry ceiling; `None` uses the queue default.
    pub max_retries: Option<u32>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn validate(&self) -> Result<(), TaskQueueError> {
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(TaskQueueError::invalid_job(
                "timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// What happens to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to pending; re-enqueue at the original priority.
    Retry { retries: u32, priority: i64 },
    /// Terminal failure.
    Exhausted { retries: u32 },
}

/// A submitted job and its lifecycle state.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub action: TaskAction,
    pub status: JobStatus,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<TaskOutput>,
    /// Last failure only; earlier attempts are overwritten.
    pub error: Option<String>,
    /// Failed attempts counted so far (never above `max_retries`).
    pub retries: u32,
    pub max_retries: u32,
    pub timeout: Option<Duration>,
}

impl Job {
    pub fn new(
        action: TaskAction,
        priority: i64,
        timeout: Option<Duration>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: JobId::new(),
            action,
            status: JobStatus::Pending,
            priority,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retries: 0,
            max_retries,
            timeout,
        }
    }

    /// Mark job as claimed by a worker.
    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, output: TaskOutput) {
        self.status = JobStatus::Completed;
        self.result = Some(output);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    /// Terminal failure that bypasses the retry budget (timeouts).
    pub fn mark_failed(&mut self, error: String) {
        self.status = JobStatus::Failed;
        self.result = None;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }

    /// Count a failed attempt and decide whether it gets another one.
    pub fn record_failure(&mut self, error: String) -> RetryDecision {
        let attempts = self.retries.saturating_add(1);
        if attempts < self.max_retries {
            self.retries = attempts;
            self.status = JobStatus::Pending;
            self.error = Some(error);
            RetryDecision::Retry {
                retries: self.retries,
                priority: self.priority,
            }
        } else {
            self.retries = attempts.min(self.max_retries);
            self.mark_failed(error);
            RetryDecision::Exhausted {
                retries: self.retries,
            }
        }
    }

    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    pub fn view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id,
            status: self.status,
            priority: self.priority,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result: self.result.clone(),
            error: self.error.clone(),
            retries: self.retries,
            max_retries: self.max_retries,
        }
    }
}

/// Point-in-time snapshot of a job, as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub status: JobStatus,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<TaskOutput>,
    pub error: Option<String>,
    pub retries: u32,
    pub max_retries: u32,
}

/// Job counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queue_size: usize,
    pub max_queue_size: usize,
    pub active_workers: usize,
    pub max_workers: usize,
    pub tasks: TaskCounts,
}

/// Error recorded on a job whose attempt exceeded its deadline.
pub fn timeout_message(timeout: Duration) -> String {
    format!("Task timed out after {} seconds", timeout.as_secs_f64())
}
