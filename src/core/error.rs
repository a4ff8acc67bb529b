//! Error types for pool operations.

use thiserror::Error;

/// Errors produced by the pool itself.
///
/// Task failures are never reported here: they are recorded on the task and
/// surfaced through [`WorkerPool::errored_task`](crate::core::WorkerPool::errored_task).
#[derive(Debug, Error)]
pub enum PoolError {
    /// `run` was called on a pool that is already running or shut down.
    #[error("pool has already been started")]
    AlreadyStarted,
    /// An OS thread for the pool could not be created.
    #[error("failed to spawn {role} thread: {source}")]
    Spawn {
        /// Which pool thread failed (`forwarder` or `worker`).
        role: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// A worker's tokio runtime could not be built.
    #[error("failed to build worker runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
