//! Worker pool: pulls jobs off the queue, runs them, reports back.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::controller::Shared;
use super::store::ClaimedJob;
use super::types::{TaskAction, TaskOutput};

/// Result of one attempt.
#[derive(Debug)]
pub(crate) enum Outcome {
    Succeeded(TaskOutput),
    Failed(String),
    TimedOut(Duration),
}

/// Spawn `max_workers` worker loops that run until `shutdown` fires.
pub(crate) fn spawn_workers(
    shared: &Arc<Shared>,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..shared.config.max_workers)
        .map(|worker| tokio::spawn(worker_loop(worker, Arc::clone(shared), shutdown.clone())))
        .collect()
}

async fn worker_loop(worker: usize, shared: Arc<Shared>, shutdown: CancellationToken) {
    debug!(queue = %shared.config.name, worker, "worker started");

    loop {
        let job_id = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            id = shared.queue.get() => id,
        };

        let Some(job) = shared.store.claim(&job_id) else {
            debug!(worker, job_id = %job_id, "skipping job that is no longer pending");
            continue;
        };

        debug!(
            worker,
            job_id = %job.id,
            kind = job.action.kind(),
            priority = job.priority,
            "claimed job"
        );

        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                // The job stays `running`; its result, if any, is dropped.
                warn!(
                    worker,
                    job_id = %job.id,
                    "shutting down with a job in flight, abandoning it"
                );
                break;
            }
            outcome = execute(&job) => outcome,
        };

        shared.finish(&job, outcome);
    }

    debug!(queue = %shared.config.name, worker, "worker stopped");
}

/// Run one attempt of `job`, honouring its timeout.
///
/// Async actions run as their own task so a panic cannot take the worker
/// down; on timeout that task is aborted. Blocking actions cannot be
/// interrupted: after a timeout the thread runs to completion and its result
/// is discarded.
async fn execute(job: &ClaimedJob) -> Outcome {
    let mut handle = match &job.action {
        TaskAction::Sync(f) => {
            let f = Arc::clone(f);
            tokio::task::spawn_blocking(move || f())
        }
        TaskAction::Async(f) => {
            let f = Arc::clone(f);
            tokio::spawn(async move { f().await })
        }
    };

    let joined = match job.timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                return Outcome::TimedOut(limit);
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(Ok(output)) => Outcome::Succeeded(output),
        Ok(Err(err)) => Outcome::Failed(format!("{err:#}")),
        Err(err) => Outcome::Failed(describe_join_error(err)),
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        format!("task panicked: {}", panic_message(err.into_panic()))
    } else {
        "task was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
