//! Infrastructure layer: the background task queue and its configuration.

pub mod config;
pub mod jobs;

pub use config::QueueConfig;
pub use jobs::{TaskAction, TaskOptions, TaskQueue, submit_as_task};
