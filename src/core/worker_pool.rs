//! Worker pool with automatic retries and graceful drain.
//!
//! Tasks flow through a fixed pipeline:
//!
//! ```text
//! queue() -> lobby -> forwarder -> dispatch -> worker --ok--> done
//!                                     ^          |
//!                                     |          +--err, retries left--> retry lane --+
//!                                     +----------------------------------------------+
//!                                                |
//!                                                +--err, exhausted--> error output -> errored_task()
//! ```
//!
//! # Key Features
//!
//! - **Backpressure**: the lobby has a fixed capacity; `queue` blocks when it is full
//! - **Dedicated threads**: each worker owns an OS thread and a single-threaded tokio runtime
//! - **Retries**: failed tasks are re-queued until the configured ceiling is reached
//! - **Graceful drain**: `shutdown` returns only once every admitted task is terminal
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_retry_pool::config::PoolConfig;
//! use prometheus_retry_pool::core::{handler_fn, CancellationToken, WorkerPool};
//!
//! let pool = WorkerPool::new(
//!     &CancellationToken::new(),
//!     PoolConfig::new().with_size(4).with_retries(2),
//!     handler_fn(|job: &mut Download| job.fetch()),
//! );
//! pool.run()?;
//!
//! for url in urls {
//!     pool.queue(Download::new(url));
//! }
//!
//! std::thread::scope(|s| {
//!     s.spawn(|| {
//!         for failed in pool.errored_tasks() {
//!             eprintln!("{} failed: {:?}", failed.url, failed.last_error());
//!         }
//!     });
//!     pool.shutdown();
//! });
//! ```

mod forwarder;
mod lifecycle;
mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, Sender};
use parking_lot::{Mutex, Once};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{PoolConfig, PoolSettings};
use crate::core::{PoolError, Task, TaskHandler};

use lifecycle::InFlight;
use worker::Worker;

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Tasks admitted but not yet terminal.
    pub in_flight: usize,
    /// Tasks waiting in the lobby, dispatch queue or retry lane.
    pub queued_tasks: u64,
    /// Tasks currently inside the handler.
    pub active_tasks: u64,
    /// Tasks admitted through `queue`.
    pub submitted_tasks: u64,
    /// Tasks that finished successfully.
    pub completed_tasks: u64,
    /// Failed attempts that were re-queued.
    pub retried_tasks: u64,
    /// Tasks delivered to the error output.
    pub failed_tasks: u64,
    /// Tasks dropped because the pool was cancelled.
    pub abandoned_tasks: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub queued_tasks: AtomicU64,
    pub active_tasks: AtomicU64,
    pub submitted_tasks: AtomicU64,
    pub completed_tasks: AtomicU64,
    pub retried_tasks: AtomicU64,
    pub failed_tasks: AtomicU64,
    pub abandoned_tasks: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize, in_flight: usize) -> PoolStats {
        PoolStats {
            worker_count,
            in_flight,
            queued_tasks: self.queued_tasks.load(Ordering::Relaxed),
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            retried_tasks: self.retried_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            abandoned_tasks: self.abandoned_tasks.load(Ordering::Relaxed),
        }
    }
}

/// Channel ends handed to the pool threads when `run` starts them.
struct Pipeline<T> {
    lobby_rx: Receiver<T>,
    dispatch_tx: Sender<T>,
    dispatch_rx: Receiver<T>,
    errors_tx: Sender<T>,
}

/// Bounded worker pool that retries failed tasks and drains gracefully.
///
/// # Design
///
/// - **Ownership hand-off**: a task is moved between stages, so one thread owns it at a time
/// - **No polling**: threads block on channels; drain waiters block on a Condvar
/// - **Clean shutdown**: dropping senders in order unblocks the forwarder, then the workers
pub struct WorkerPool<T, H>
where
    T: Task + Send + 'static,
    H: TaskHandler<T>,
{
    id: Uuid,
    settings: PoolSettings,
    handler: H,

    /// Admission side of the lobby. `None` once admission is closed.
    lobby_tx: Mutex<Option<Sender<T>>>,

    /// Pool's own dispatch sender, dropped only after the drain completes.
    dispatch_tx: Mutex<Option<Sender<T>>>,

    /// Channel ends waiting for `run`.
    pipeline: Mutex<Option<Pipeline<T>>>,

    errors_rx: Receiver<T>,
    in_flight: Arc<InFlight>,
    counters: Arc<PoolCounters>,
    cancel: CancellationToken,
    shutdown_once: Once,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<T, H> WorkerPool<T, H>
where
    T: Task + Send + 'static,
    H: TaskHandler<T>,
{
    /// Create a pool bound to `scope`.
    ///
    /// The pool cancels when `scope` is cancelled. The configuration is normalized
    /// here (see [`PoolConfig::normalize`]). No thread is started until [`run`](Self::run).
    pub fn new(scope: &CancellationToken, config: PoolConfig, handler: H) -> Self {
        let settings = config.normalize();
        let id = Uuid::new_v4();

        let (lobby_tx, lobby_rx) = flume::bounded(settings.lobby_size);
        let (dispatch_tx, dispatch_rx) = flume::bounded(0);
        let (errors_tx, errors_rx) = flume::unbounded();

        info!(
            pool_id = %id,
            workers = settings.workers,
            lobby_size = settings.lobby_size,
            retries = ?settings.retries,
            "WorkerPool created"
        );

        Self {
            id,
            settings,
            handler,
            lobby_tx: Mutex::new(Some(lobby_tx)),
            dispatch_tx: Mutex::new(Some(dispatch_tx.clone())),
            pipeline: Mutex::new(Some(Pipeline {
                lobby_rx,
                dispatch_tx,
                dispatch_rx,
                errors_tx,
            })),
            errors_rx,
            in_flight: Arc::new(InFlight::new()),
            counters: Arc::new(PoolCounters::default()),
            cancel: scope.child_token(),
            shutdown_once: Once::new(),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Start the forwarder and the worker threads. Does not block.
    ///
    /// If a thread cannot be created the pool is unusable: admission closes,
    /// tasks already in the lobby are abandoned and any threads already started
    /// are stopped, so a later [`shutdown`](Self::shutdown) returns promptly.
    ///
    /// # Errors
    ///
    /// - `PoolError::AlreadyStarted` if the pool was already started or shut down
    /// - `PoolError::Spawn` / `PoolError::Runtime` if a thread could not be created
    pub fn run(&self) -> Result<(), PoolError> {
        let Some(pipeline) = self.pipeline.lock().take() else {
            warn!(pool_id = %self.id, "run called on a pool that was already started");
            return Err(PoolError::AlreadyStarted);
        };

        let mut threads = self.threads.lock();
        if let Err(e) = self.start(&pipeline, &mut threads) {
            error!(pool_id = %self.id, error = %e, "Failed to start worker pool");
            let started = std::mem::take(&mut *threads);
            drop(threads);
            self.abort_start(pipeline, started);
            return Err(e);
        }

        info!(pool_id = %self.id, workers = self.settings.workers, "WorkerPool running");
        Ok(())
    }

    fn start(&self, pipeline: &Pipeline<T>, threads: &mut Vec<JoinHandle<()>>) -> Result<(), PoolError> {
        let (retry_tx, retry_rx) = flume::unbounded();
        for worker_id in 0..self.settings.workers {
            let worker = Worker {
                id: worker_id,
                pool_id: self.id,
                handler: self.handler.clone(),
                retries: self.settings.retries,
                dispatch_rx: pipeline.dispatch_rx.clone(),
                retry_tx: retry_tx.clone(),
                retry_rx: retry_rx.clone(),
                errors_tx: pipeline.errors_tx.clone(),
                cancel: self.cancel.clone(),
                in_flight: Arc::clone(&self.in_flight),
                counters: Arc::clone(&self.counters),
            };
            threads.push(worker.spawn(self.settings.thread_stack_size)?);
        }

        let pool_id = self.id;
        let lobby_rx = pipeline.lobby_rx.clone();
        let dispatch_tx = pipeline.dispatch_tx.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let counters = Arc::clone(&self.counters);
        let mut builder = thread::Builder::new().name("retry-pool-forwarder".into());
        if let Some(size) = self.settings.thread_stack_size {
            builder = builder.stack_size(size);
        }
        let forwarder = builder
            .spawn(move || forwarder::forward(pool_id, &lobby_rx, &dispatch_tx, &in_flight, &counters))
            .map_err(|source| PoolError::Spawn {
                role: "forwarder",
                source,
            })?;
        threads.push(forwarder);
        Ok(())
    }

    /// Tear down a partially started pool.
    ///
    /// No task reached a worker yet (the forwarder is the last thread started),
    /// so every admitted task is still in the lobby.
    fn abort_start(&self, pipeline: Pipeline<T>, started: Vec<JoinHandle<()>>) {
        drop(self.lobby_tx.lock().take());
        drop(self.dispatch_tx.lock().take());

        let Pipeline {
            lobby_rx,
            dispatch_tx,
            dispatch_rx,
            errors_tx,
        } = pipeline;
        drop((dispatch_tx, dispatch_rx, errors_tx));

        // Ends once every in-progress `queue` call has released its sender.
        for task in lobby_rx.iter() {
            self.release(&task, "Pool failed to start, dropping queued task");
        }

        self.join_handles(started);
    }

    /// Admit a task, blocking while the lobby is full.
    ///
    /// After [`shutdown`](Self::shutdown) has closed admission the task is dropped
    /// silently. Callers that need guaranteed delivery must not race `queue`
    /// against `shutdown`.
    pub fn queue(&self, task: T) {
        let Some(lobby) = self.admit() else {
            return;
        };
        if let Err(flume::SendError(task)) = lobby.send(task) {
            self.release(&task, "Lobby closed before the task was accepted, dropping it");
        }
    }

    /// Admit a task from an async context, waiting while the lobby is full.
    ///
    /// Same contract as [`queue`](Self::queue).
    pub async fn queue_async(&self, task: T) {
        let Some(lobby) = self.admit() else {
            return;
        };
        if let Err(flume::SendError(task)) = lobby.send_async(task).await {
            self.release(&task, "Lobby closed before the task was accepted, dropping it");
        }
    }

    /// Count the task in flight before it becomes visible, and hand back a lobby sender.
    fn admit(&self) -> Option<Sender<T>> {
        let guard = self.lobby_tx.lock();
        let Some(lobby) = guard.as_ref() else {
            debug!(pool_id = %self.id, "Admission closed, dropping task");
            return None;
        };
        self.in_flight.admit();
        self.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
        self.counters.queued_tasks.fetch_add(1, Ordering::Relaxed);
        Some(lobby.clone())
    }

    /// Count an admitted task that never reached a worker as abandoned.
    fn release(&self, task: &T, reason: &'static str) {
        warn!(pool_id = %self.id, failures = task.error_count(), "{reason}");
        self.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
        self.counters.abandoned_tasks.fetch_add(1, Ordering::Relaxed);
        self.in_flight.finish();
    }

    /// Stop admission, wait for every in-flight task, then stop the threads.
    ///
    /// Runs its body exactly once; concurrent and later callers block until that
    /// single drain completes. A pool that was never started is started here so
    /// tasks already in the lobby can drain.
    ///
    /// Must not be called from inside a task handler.
    pub fn shutdown(&self) {
        self.shutdown_once.call_once(|| {
            info!(pool_id = %self.id, "Shutting down worker pool");

            drop(self.lobby_tx.lock().take());

            if self.pipeline.lock().is_some() {
                debug!(pool_id = %self.id, "Pool was never started, starting it to drain");
                if let Err(e) = self.run() {
                    // A failed start has already abandoned the lobby; nothing is left to drain.
                    error!(pool_id = %self.id, error = %e, "Failed to start pool for drain");
                }
            }

            self.in_flight.wait_drained();

            // Dispatch closes only now: closing it earlier would strand retries.
            drop(self.dispatch_tx.lock().take());
            let threads = std::mem::take(&mut *self.threads.lock());
            self.join_handles(threads);

            info!(pool_id = %self.id, "Worker pool shut down complete");
        });
    }

    /// Fire the pool's cancellation signal. Does not wait and does not close queues.
    ///
    /// Running handlers finish their current attempt. Any task that then fails,
    /// and any retry not yet picked up, is abandoned instead of re-queued or
    /// reported. A later [`shutdown`](Self::shutdown) still completes.
    pub fn cancel(&self) {
        info!(pool_id = %self.id, "Cancelling worker pool");
        self.cancel.cancel();
    }

    /// Whether the pool or its enclosing scope has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Block until every admitted task is terminal. Admission stays open.
    pub fn wait(&self) {
        self.in_flight.wait_drained();
    }

    /// Like [`wait`](Self::wait) with a deadline. Returns `true` if the pool drained in time.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.in_flight.wait_drained_for(timeout)
    }

    /// Async variant of [`wait`](Self::wait). The blocking wait runs on tokio's blocking pool.
    pub async fn wait_async(&self) {
        let in_flight = Arc::clone(&self.in_flight);
        if let Err(e) = tokio::task::spawn_blocking(move || in_flight.wait_drained()).await {
            error!(pool_id = %self.id, error = %e, "Drain waiter failed");
        }
    }

    /// Receive the next task that exhausted its retries.
    ///
    /// Blocks until one is available. Returns `None` once the pool has shut down
    /// and every failed task has been handed out.
    #[must_use]
    pub fn errored_task(&self) -> Option<T> {
        self.errors_rx.recv().ok()
    }

    /// Async variant of [`errored_task`](Self::errored_task).
    pub async fn errored_task_async(&self) -> Option<T> {
        self.errors_rx.recv_async().await.ok()
    }

    /// Take a failed task if one is ready, without blocking.
    #[must_use]
    pub fn try_errored_task(&self) -> Option<T> {
        self.errors_rx.try_recv().ok()
    }

    /// Blocking iterator over failed tasks; ends once the pool has shut down.
    pub fn errored_tasks(&self) -> impl Iterator<Item = T> + '_ {
        self.errors_rx.iter()
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters
            .snapshot(self.settings.workers, self.in_flight.current())
    }

    /// Settings the pool was built with, after normalization.
    #[must_use]
    pub const fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    fn join_handles(&self, threads: Vec<JoinHandle<()>>) {
        let count = threads.len();
        for handle in threads {
            let name = handle.thread().name().unwrap_or("unnamed").to_owned();
            if handle.join().is_err() {
                warn!(pool_id = %self.id, thread = %name, "Pool thread panicked");
            } else {
                debug!(pool_id = %self.id, thread = %name, "Pool thread joined");
            }
        }
        debug!(pool_id = %self.id, threads = count, "All pool threads joined");
    }
}

impl<T, H> Drop for WorkerPool<T, H>
where
    T: Task + Send + 'static,
    H: TaskHandler<T>,
{
    fn drop(&mut self) {
        if self.shutdown_once.state().done() {
            return;
        }
        // Wind the threads down without joining them; `shutdown` is the graceful path.
        self.cancel.cancel();
        drop(self.lobby_tx.lock().take());
        drop(self.dispatch_tx.lock().take());
        debug!(pool_id = %self.id, "WorkerPool dropped without shutdown, threads detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{handler_fn, TaskError, TaskHeader};
    use anyhow::anyhow;

    fn ok_pool(config: PoolConfig) -> WorkerPool<TaskHeader, impl TaskHandler<TaskHeader>> {
        WorkerPool::new(
            &CancellationToken::new(),
            config,
            handler_fn(|_: &mut TaskHeader| -> Result<(), TaskError> { Ok(()) }),
        )
    }

    #[test]
    fn test_pool_stats_default() {
        let stats = PoolStats::default();
        assert_eq!(stats.worker_count, 0);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.completed_tasks, 0);
    }

    #[test]
    fn test_pool_counters_snapshot() {
        let counters = PoolCounters::default();
        counters.submitted_tasks.fetch_add(10, Ordering::Relaxed);
        counters.completed_tasks.fetch_add(5, Ordering::Relaxed);
        counters.retried_tasks.fetch_add(3, Ordering::Relaxed);

        let stats = counters.snapshot(4, 2);
        assert_eq!(stats.worker_count, 4);
        assert_eq!(stats.in_flight, 2);
        assert_eq!(stats.submitted_tasks, 10);
        assert_eq!(stats.completed_tasks, 5);
        assert_eq!(stats.retried_tasks, 3);
    }

    #[test]
    fn test_run_twice_is_rejected() {
        let pool = ok_pool(PoolConfig::new().with_size(2));
        pool.run().unwrap();
        assert!(matches!(pool.run(), Err(PoolError::AlreadyStarted)));
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_without_run_drains_lobby() {
        let pool = ok_pool(PoolConfig::new().with_lobby_size(3));
        for _ in 0..3 {
            pool.queue(TaskHeader::new());
        }
        assert_eq!(pool.stats().in_flight, 3);

        pool.shutdown();

        let stats = pool.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.completed_tasks, 3);
        assert!(pool.errored_task().is_none());
    }

    /// Stack size no OS will grant, so thread creation fails.
    const IMPOSSIBLE_STACK: usize = usize::MAX / 2;

    #[test]
    fn test_failed_run_releases_lobby() {
        let pool = ok_pool(
            PoolConfig::new()
                .with_size(2)
                .with_lobby_size(2)
                .with_thread_stack_size(IMPOSSIBLE_STACK),
        );
        pool.queue(TaskHeader::new());
        pool.queue(TaskHeader::new());
        assert_eq!(pool.stats().in_flight, 2);

        assert!(matches!(
            pool.run(),
            Err(PoolError::Spawn { role: "worker", .. })
        ));

        let stats = pool.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.queued_tasks, 0);
        assert_eq!(stats.abandoned_tasks, 2);

        // Admission is closed and the pool cannot be restarted.
        pool.queue(TaskHeader::new());
        assert_eq!(pool.stats().submitted_tasks, 2);
        assert!(matches!(pool.run(), Err(PoolError::AlreadyStarted)));

        assert!(pool.wait_timeout(Duration::from_secs(1)));
        pool.shutdown();
        assert!(pool.errored_task().is_none());
    }

    #[test]
    fn test_shutdown_completes_when_start_fails() {
        let pool = ok_pool(
            PoolConfig::new()
                .with_lobby_size(3)
                .with_thread_stack_size(IMPOSSIBLE_STACK),
        );
        for _ in 0..3 {
            pool.queue(TaskHeader::new());
        }

        let (done_tx, done_rx) = flume::bounded(1);
        thread::scope(|s| {
            s.spawn(|| {
                pool.shutdown();
                let _ = done_tx.send(());
            });
            assert!(
                done_rx.recv_timeout(Duration::from_secs(5)).is_ok(),
                "shutdown hung after a failed start"
            );
        });

        let stats = pool.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.abandoned_tasks, 3);
    }

    #[test]
    fn test_try_errored_task_does_not_block() {
        let pool = WorkerPool::new(
            &CancellationToken::new(),
            PoolConfig::new().with_retries(0),
            handler_fn(|_: &mut TaskHeader| -> Result<(), TaskError> { Err(anyhow!("nope")) }),
        );
        pool.run().unwrap();
        assert!(pool.try_errored_task().is_none());

        pool.queue(TaskHeader::new());
        pool.wait();

        let failed = pool.try_errored_task().unwrap();
        assert_eq!(failed.error_count(), 1);
        assert!(pool.try_errored_task().is_none());
        pool.shutdown();
    }

    #[test]
    fn test_scope_cancellation_propagates() {
        let scope = CancellationToken::new();
        let pool = WorkerPool::new(
            &scope,
            PoolConfig::new(),
            handler_fn(|_: &mut TaskHeader| -> Result<(), TaskError> { Err(anyhow!("unused")) }),
        );
        assert!(!pool.is_cancelled());
        scope.cancel();
        assert!(pool.is_cancelled());
    }

    #[test]
    fn test_cancelling_pool_leaves_scope_alone() {
        let scope = CancellationToken::new();
        let pool = ok_pool(PoolConfig::new());
        let sibling = WorkerPool::new(
            &scope,
            PoolConfig::new(),
            handler_fn(|_: &mut TaskHeader| -> Result<(), TaskError> { Ok(()) }),
        );
        sibling.cancel();
        assert!(sibling.is_cancelled());
        assert!(!scope.is_cancelled());
        assert!(!pool.is_cancelled());
    }
}
