//! Queue controller: lifecycle, submission and status API.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dbsbm_core::{JobId, TaskQueueError, TaskQueueResult};

use crate::config::QueueConfig;

use super::executor::{self, Outcome};
use super::queue::PriorityQueue;
use super::store::{ClaimedJob, JobStore};
use super::types::{
    Job, JobStatusView, QueueStats, RetryDecision, TaskAction, TaskOptions, timeout_message,
};

/// State shared by the controller, its workers and the cleanup sweep.
pub(crate) struct Shared {
    pub(crate) config: QueueConfig,
    pub(crate) queue: PriorityQueue<JobId>,
    pub(crate) store: JobStore,
}

impl Shared {
    /// Record the outcome of one attempt reported by a worker.
    pub(crate) fn finish(self: &Arc<Self>, job: &ClaimedJob, outcome: Outcome) {
        match outcome {
            Outcome::Succeeded(output) => {
                if self.store.complete(&job.id, output) {
                    debug!(job_id = %job.id, "job completed");
                }
            }
            Outcome::TimedOut(limit) => {
                error!(
                    job_id = %job.id,
                    timeout_secs = limit.as_secs_f64(),
                    "job timed out"
                );
                self.store.fail(&job.id, timeout_message(limit));
            }
            Outcome::Failed(err) => {
                // Only the last error survives on the job; log every attempt.
                warn!(job_id = %job.id, error = %err, "job attempt failed");

                match self.store.record_failure(&job.id, err) {
                    Some(RetryDecision::Retry { retries, priority }) => {
                        debug!(job_id = %job.id, retries, priority, "re-enqueueing job");
                        self.requeue(job.id, priority);
                    }
                    Some(RetryDecision::Exhausted { retries }) => {
                        error!(job_id = %job.id, retries, "job failed, retries exhausted");
                    }
                    None => {
                        debug!(job_id = %job.id, "job evicted before its outcome was recorded");
                    }
                }
            }
        }
    }

    /// Put a retried job back without ever blocking the reporting worker:
    /// if the queue is full the wait moves to a detached task.
    fn requeue(self: &Arc<Self>, id: JobId, priority: i64) {
        if let Err(id) = self.queue.try_put(priority, id) {
            debug!(job_id = %id, "queue full, deferring retry");
            let shared = Arc::clone(self);
            tokio::spawn(async move { shared.queue.put(priority, id).await });
        }
    }

    fn remove_finished_older_than(&self, max_age: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        match Utc::now().checked_sub_signed(age) {
            Some(cutoff) => self.store.remove_finished_before(cutoff),
            None => 0,
        }
    }
}

struct Running {
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    sweeper: JoinHandle<()>,
}

/// Priority-ordered, bounded, multi-worker background job runner.
///
/// Cheap to clone; clones share the same queue. Construct one per
/// application and hand it to whatever needs to submit work. `start`/`stop`
/// belong to the host's startup and shutdown hooks.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<Shared>,
    running: Arc<Mutex<Option<Running>>>,
}

impl TaskQueue {
    pub fn new(config: QueueConfig) -> TaskQueueResult<Self> {
        config.validate()?;
        let queue = PriorityQueue::new(config.max_queue_size)?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                queue,
                store: JobStore::new(),
            }),
            running: Arc::new(Mutex::new(None)),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle().is_some()
    }

    /// Spawn the worker pool and the periodic cleanup sweep.
    ///
    /// Calling it on a running queue is a logged no-op.
    pub async fn start(&self) -> TaskQueueResult<()> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.is_some() {
            info!(queue = %self.shared.config.name, "task queue already running");
            return Ok(());
        }

        if self.shared.config.max_workers == 0 {
            return Err(TaskQueueError::invalid_queue(
                "max_workers must be greater than zero",
            ));
        }

        let shutdown = CancellationToken::new();
        let workers = executor::spawn_workers(&self.shared, &shutdown);
        let sweeper = tokio::spawn(sweep_loop(Arc::clone(&self.shared), shutdown.clone()));

        *lifecycle = Some(Running {
            shutdown,
            workers,
            sweeper,
        });

        info!(
            queue = %self.shared.config.name,
            max_workers = self.shared.config.max_workers,
            max_queue_size = self.shared.config.max_queue_size,
            "task queue started"
        );
        Ok(())
    }

    /// Stop every worker loop and wait for them to exit.
    ///
    /// In-flight jobs are abandoned and stay `running`. Queued jobs stay
    /// queued and are picked up if the queue is started again.
    pub async fn stop(&self) {
        let running = self.lifecycle().take();
        let Some(running) = running else {
            debug!(queue = %self.shared.config.name, "task queue not running");
            return;
        };

        running.shutdown.cancel();
        for handle in running.workers {
            if let Err(err) = handle.await {
                error!(queue = %self.shared.config.name, error = %err, "worker exited abnormally");
            }
        }
        if let Err(err) = running.sweeper.await {
            error!(
                queue = %self.shared.config.name,
                error = %err,
                "cleanup sweep exited abnormally"
            );
        }

        info!(queue = %self.shared.config.name, "task queue stopped");
    }

    /// Register and enqueue a job, returning its id without waiting for it
    /// to run. Suspends only while the queue is full.
    pub async fn submit(&self, action: TaskAction, options: TaskOptions) -> TaskQueueResult<JobId> {
        let shutdown = self
            .lifecycle()
            .as_ref()
            .map(|running| running.shutdown.clone())
            .ok_or(TaskQueueError::NotRunning)?;
        options.validate()?;

        let max_retries = options
            .max_retries
            .unwrap_or(self.shared.config.default_max_retries);
        let job = Job::new(action, options.priority, options.timeout, max_retries);
        let id = job.id;
        let kind = job.action.kind();

        self.shared.store.insert(job);
        let mut registration = Registration::new(&self.shared.store, id);

        tokio::select! {
            biased;
            () = self.shared.queue.put(options.priority, id) => registration.keep(),
            () = shutdown.cancelled() => return Err(TaskQueueError::NotRunning),
        }

        debug!(job_id = %id, kind, priority = options.priority, max_retries, "job submitted");
        Ok(id)
    }

    pub fn get_status(&self, id: &JobId) -> Option<JobStatusView> {
        self.shared.store.get(id)
    }

    /// Cancel a job no worker has claimed yet. `false` for unknown ids and
    /// jobs in any other state.
    pub fn cancel(&self, id: &JobId) -> bool {
        let cancelled = self.shared.store.cancel(id);
        if cancelled {
            info!(job_id = %id, "job cancelled");
        }
        cancelled
    }

    pub fn get_queue_stats(&self) -> QueueStats {
        let active_workers = self.lifecycle().as_ref().map_or(0, |running| {
            running
                .workers
                .iter()
                .filter(|handle| !handle.is_finished())
                .count()
        });

        QueueStats {
            queue_size: self.shared.queue.len(),
            max_queue_size: self.shared.queue.capacity(),
            active_workers,
            max_workers: self.shared.config.max_workers,
            tasks: self.shared.store.counts(),
        }
    }

    /// Forget finished (completed, failed or cancelled) jobs that finished at
    /// least `max_age` ago. Returns how many were removed.
    pub fn cleanup_old_jobs(&self, max_age: Duration) -> usize {
        let removed = self.shared.remove_finished_older_than(max_age);
        debug!(queue = %self.shared.config.name, removed, "cleaned up old jobs");
        removed
    }

    fn lifecycle(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.shared.config.name)
            .field("running", &self.is_running())
            .field("queue", &self.shared.queue)
            .finish()
    }
}

/// Submit `action` on `queue` and hand back the job id.
///
/// Makes the hand-off to background execution explicit at the call site.
pub async fn submit_as_task(
    queue: &TaskQueue,
    action: TaskAction,
    options: TaskOptions,
) -> TaskQueueResult<JobId> {
    debug!(kind = action.kind(), priority = options.priority, "handing work to the task queue");
    queue.submit(action, options).await
}

/// Removes a registered job again unless the enqueue went through, so a
/// dropped or failed `submit` leaves no orphan behind.
struct Registration<'a> {
    store: &'a JobStore,
    id: JobId,
    keep: bool,
}

impl<'a> Registration<'a> {
    fn new(store: &'a JobStore, id: JobId) -> Self {
        Self {
            store,
            id,
            keep: false,
        }
    }

    fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.keep {
            self.store.remove(&self.id);
        }
    }
}

async fn sweep_loop(shared: Arc<Shared>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(shared.config.cleanup_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let removed = shared.remove_finished_older_than(shared.config.job_retention);
                if removed > 0 {
                    info!(queue = %shared.config.name, removed, "evicted finished jobs");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{JobStatus, TaskOutput};

    fn queue(workers: usize) -> TaskQueue {
        TaskQueue::new(QueueConfig::default().with_max_workers(workers)).unwrap()
    }

    fn noop() -> TaskAction {
        TaskAction::sync_fn(|| Ok(TaskOutput::Null))
    }

    #[tokio::test]
    async fn submit_requires_a_running_queue() {
        let tasks = queue(1);
        let err = tasks.submit(noop(), TaskOptions::new()).await.unwrap_err();

        assert_eq!(err, TaskQueueError::NotRunning);
        assert_eq!(tasks.get_queue_stats().tasks.total, 0);
    }

    #[tokio::test]
    async fn start_rejects_zero_workers() {
        let tasks = queue(0);
        let err = tasks.start().await.unwrap_err();

        assert!(matches!(err, TaskQueueError::InvalidQueueConfiguration(_)));
        assert!(!tasks.is_running());
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let tasks = queue(2);
        tasks.start().await.unwrap();
        tasks.start().await.unwrap();

        assert!(tasks.is_running());
        assert_eq!(tasks.get_queue_stats().active_workers, 2);

        tasks.stop().await;
        assert!(!tasks.is_running());
        assert_eq!(tasks.get_queue_stats().active_workers, 0);
    }

    #[tokio::test]
    async fn invalid_options_fail_before_registration() {
        let tasks = queue(1);
        tasks.start().await.unwrap();

        let err = tasks
            .submit(noop(), TaskOptions::new().with_timeout(Duration::ZERO))
            .await
            .unwrap_err();

        assert!(matches!(err, TaskQueueError::InvalidJobConfiguration(_)));
        assert_eq!(tasks.get_queue_stats().tasks.total, 0);
        tasks.stop().await;
    }

    #[tokio::test]
    async fn default_retry_ceiling_comes_from_config() {
        let tasks = TaskQueue::new(
            QueueConfig::default()
                .with_max_workers(1)
                .with_default_max_retries(7),
        )
        .unwrap();
        tasks.start().await.unwrap();

        let id = tasks.submit(noop(), TaskOptions::new()).await.unwrap();
        let explicit = tasks
            .submit(noop(), TaskOptions::new().with_max_retries(1))
            .await
            .unwrap();

        assert_eq!(tasks.get_status(&id).unwrap().max_retries, 7);
        assert_eq!(tasks.get_status(&explicit).unwrap().max_retries, 1);
        tasks.stop().await;
    }

    #[tokio::test]
    async fn cleanup_with_huge_age_keeps_everything() {
        let tasks = queue(1);
        tasks.start().await.unwrap();
        let id = tasks.submit(noop(), TaskOptions::new()).await.unwrap();

        for _ in 0..200 {
            if tasks.get_status(&id).unwrap().status == JobStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(tasks.cleanup_old_jobs(Duration::MAX), 0);
        assert!(tasks.get_status(&id).is_some());
        tasks.stop().await;
    }

    #[test]
    fn zero_capacity_config_is_rejected() {
        let err = TaskQueue::new(QueueConfig::default().with_max_queue_size(0)).unwrap_err();
        assert!(matches!(err, TaskQueueError::InvalidQueueConfiguration(_)));
    }
}
