//! # Prometheus Retry Pool
//!
//! A bounded worker pool that runs caller-supplied tasks concurrently, retries
//! failed tasks up to a configured ceiling, and shuts down gracefully by draining
//! every in-flight task (retries included) before its threads exit.
//!
//! ## Core Problem Solved
//!
//! Background work such as fetching, indexing or model calls fails transiently.
//! Callers want to hand work off, have flaky failures retried, collect the tasks
//! that failed for good, and stop the whole thing without losing anything that
//! was already accepted.
//!
//! ## Key Features
//!
//! - **Backpressure**: a fixed-capacity admission queue ("lobby") in front of the workers
//! - **Automatic retries**: per-task error history drives re-queueing until the ceiling
//! - **Error stream**: tasks that exhausted their retries are handed back via `errored_task`
//! - **Graceful drain**: `shutdown` waits until every admitted task is terminal
//! - **Cancellation scopes**: pools are bound to a `CancellationToken` hierarchy
//!
//! ## Example
//!
//! ```rust,no_run
//! use prometheus_retry_pool::config::PoolConfig;
//! use prometheus_retry_pool::core::{handler_fn, CancellationToken, Task, TaskError, TaskHeader, WorkerPool};
//!
//! struct Ping {
//!     header: TaskHeader,
//!     host: String,
//! }
//!
//! impl AsRef<TaskHeader> for Ping {
//!     fn as_ref(&self) -> &TaskHeader { &self.header }
//! }
//!
//! impl AsMut<TaskHeader> for Ping {
//!     fn as_mut(&mut self) -> &mut TaskHeader { &mut self.header }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool: WorkerPool<Ping, _> = WorkerPool::new(
//!     &CancellationToken::new(),
//!     PoolConfig::new().with_size(4).with_retries(2),
//!     handler_fn(|ping: &mut Ping| -> Result<(), TaskError> {
//!         std::net::TcpStream::connect((ping.host.as_str(), 80))?;
//!         Ok(())
//!     }),
//! );
//! pool.run()?;
//!
//! std::thread::scope(|s| {
//!     s.spawn(|| {
//!         for failed in pool.errored_tasks() {
//!             eprintln!("{} unreachable after {} attempts", failed.host, failed.error_count());
//!         }
//!     });
//!
//!     for host in ["example.com", "example.org"] {
//!         pool.queue(Ping { header: TaskHeader::new(), host: host.into() });
//!     }
//!     pool.shutdown();
//! });
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Task contract, handlers, errors and the worker pool.
pub mod core;
/// Configuration models and normalization.
pub mod config;
/// Shared utilities.
pub mod util;
