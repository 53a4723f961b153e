//! Standalone host for the background task queue.
//!
//! Runs the worker pool with settings from `DBSBM_TASK_QUEUE_*` and logs
//! queue statistics until SIGTERM/SIGINT.

mod shutdown;

use std::time::Duration;

use anyhow::Context;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use dbsbm_infra::{QueueConfig, TaskQueue};

const ENV_STATS_INTERVAL_SECS: &str = "DBSBM_STATS_INTERVAL_SECS";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dbsbm_observability::init();

    let config = QueueConfig::from_env().context("loading task queue configuration")?;
    let stats_every = stats_interval()?;

    let tasks = TaskQueue::new(config).context("building task queue")?;
    tasks.start().await.context("starting task queue")?;

    let shutdown = shutdown::install_shutdown_handler()?;
    let reporter = tokio::spawn(report_stats(tasks.clone(), stats_every, shutdown.clone()));

    shutdown.cancelled().await;

    tasks.stop().await;
    if let Err(err) = reporter.await {
        tracing::error!(error = %err, "stats reporter exited abnormally");
    }

    tracing::info!("worker exited");
    Ok(())
}

fn stats_interval() -> anyhow::Result<Duration> {
    let secs = match std::env::var(ENV_STATS_INTERVAL_SECS) {
        Ok(raw) => raw.trim().parse::<u64>().with_context(|| {
            format!("{ENV_STATS_INTERVAL_SECS}={raw:?} is not a number of seconds")
        })?,
        Err(_) => 60,
    };
    anyhow::ensure!(secs > 0, "{ENV_STATS_INTERVAL_SECS} must be greater than zero");
    Ok(Duration::from_secs(secs))
}

async fn report_stats(tasks: TaskQueue, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let stats = tasks.get_queue_stats();
                match serde_json::to_string(&stats) {
                    Ok(json) => {
                        tracing::info!(queue = %tasks.config().name, stats = %json, "queue stats")
                    }
                    Err(err) => tracing::warn!(error = %err, "failed to serialize queue stats"),
                }
            }
        }
    }
}
