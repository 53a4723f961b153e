//! `dbsbm-core`: shared building blocks for the bot's background work.
//!
//! Holds the identifiers and error model used by the task queue and its hosts.
//! No runtime or infrastructure concerns live here.

pub mod error;
pub mod id;

pub use error::{ConfigError, TaskQueueError, TaskQueueResult};
pub use id::JobId;
