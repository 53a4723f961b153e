//! In-process background job runner.
//!
//! ## Design
//!
//! - Jobs are ordered by priority (lower value first, FIFO among equals)
//! - The queue is bounded; a full queue suspends the submitter
//! - A fixed pool of workers runs jobs; blocking actions go to the blocking
//!   thread pool, async actions are awaited
//! - Failed attempts are retried up to the job's ceiling; timeouts are final
//! - Job state lives in memory only and is lost on restart
//!
//! ## Components
//!
//! - `Job` / `TaskAction`: one unit of work and its lifecycle state
//! - `PriorityQueue`: bounded min-priority queue with backpressure
//! - `JobStore`: the id → job tracking table
//! - `executor`: the worker loops
//! - `TaskQueue`: lifecycle, submission, status and cancellation API

pub mod controller;
mod executor;
pub mod queue;
pub mod store;
pub mod types;

pub use controller::{TaskQueue, submit_as_task};
pub use queue::PriorityQueue;
pub use store::{ClaimedJob, JobStore};
pub use types::{
    Job, JobStatus, JobStatusView, QueueStats, RetryDecision, TaskAction, TaskCounts, TaskFuture,
    TaskOptions, TaskOutput, timeout_message,
};
