//! In-memory job tracking table.
//!
//! Every state transition goes through this store under its lock, so a job
//! is never mutated by two workers at once. Nothing here is persisted.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use dbsbm_core::JobId;

use super::types::{
    Job, JobStatus, JobStatusView, RetryDecision, TaskAction, TaskCounts, TaskOutput,
};

/// What a worker needs to run one attempt of a job.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub action: TaskAction,
    pub priority: i64,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) {
        self.lock().insert(job.id, job);
    }

    pub fn remove(&self, id: &JobId) -> Option<Job> {
        self.lock().remove(id)
    }

    pub fn get(&self, id: &JobId) -> Option<JobStatusView> {
        self.lock().get(id).map(Job::view)
    }

    /// Move a pending job to running.
    ///
    /// Returns `None` when the job is unknown or no longer pending (e.g. it
    /// was cancelled while queued).
    pub fn claim(&self, id: &JobId) -> Option<ClaimedJob> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(id)?;
        if job.status != JobStatus::Pending {
            return None;
        }

        job.mark_running();
        Some(ClaimedJob {
            id: job.id,
            action: job.action.clone(),
            priority: job.priority,
            timeout: job.timeout,
        })
    }

    pub fn complete(&self, id: &JobId, output: TaskOutput) -> bool {
        self.update(id, |job| job.mark_completed(output))
    }

    /// Terminal failure outside the retry budget.
    pub fn fail(&self, id: &JobId, error: String) -> bool {
        self.update(id, |job| job.mark_failed(error))
    }

    /// Count a failed attempt. `None` if the job is no longer tracked.
    pub fn record_failure(&self, id: &JobId, error: String) -> Option<RetryDecision> {
        self.lock().get_mut(id).map(|job| job.record_failure(error))
    }

    /// Cancel a job that no worker has claimed yet.
    pub fn cancel(&self, id: &JobId) -> bool {
        match self.lock().get_mut(id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.mark_cancelled();
                true
            }
            _ => false,
        }
    }

    pub fn counts(&self) -> TaskCounts {
        let jobs = self.lock();
        let mut counts = TaskCounts {
            total: jobs.len(),
            ..TaskCounts::default()
        };

        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
            }
        }

        counts
    }

    /// Drop terminal jobs that finished at or before `cutoff`. Returns the
    /// number of jobs removed.
    pub fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.completed_at.is_some_and(|at| at <= cutoff))
        });
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, id: &JobId, f: impl FnOnce(&mut Job)) -> bool {
        match self.lock().get_mut(id) {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
