//! Core pool abstractions: tasks, handlers, errors and the worker pool itself.

pub mod error;
pub mod handler;
pub mod task;
pub mod worker_pool;

pub use error::PoolError;
pub use handler::{handler_fn, FnHandler, TaskHandler};
pub use task::{Task, TaskError, TaskHeader};
pub use tokio_util::sync::CancellationToken;
pub use worker_pool::{PoolStats, WorkerPool};
