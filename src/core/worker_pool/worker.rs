//! Worker threads: pull, execute, and route each attempt.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::anyhow;
use flume::{Receiver, Sender};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, warn};
use uuid::Uuid;

use crate::config::RetryLimit;
use crate::core::{PoolError, Task, TaskError, TaskHandler};

use super::lifecycle::InFlight;
use super::PoolCounters;

/// Everything one worker thread owns.
pub(super) struct Worker<T, H> {
    pub(super) id: usize,
    pub(super) pool_id: Uuid,
    pub(super) handler: H,
    pub(super) retries: RetryLimit,
    pub(super) dispatch_rx: Receiver<T>,
    pub(super) retry_tx: Sender<T>,
    pub(super) retry_rx: Receiver<T>,
    pub(super) errors_tx: Sender<T>,
    pub(super) cancel: CancellationToken,
    pub(super) in_flight: Arc<InFlight>,
    pub(super) counters: Arc<PoolCounters>,
}

impl<T, H> Worker<T, H>
where
    T: Task + Send + 'static,
    H: TaskHandler<T>,
{
    /// Start the worker on a dedicated OS thread with its own single-threaded tokio runtime.
    pub(super) fn spawn(self, stack_size: Option<usize>) -> Result<JoinHandle<()>, PoolError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(PoolError::Runtime)?;

        let mut builder = thread::Builder::new().name(format!("retry-pool-worker-{}", self.id));
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }

        builder
            .spawn(move || runtime.block_on(self.run()))
            .map_err(|source| PoolError::Spawn {
                role: "worker",
                source,
            })
    }

    async fn run(self) {
        debug!(pool_id = %self.pool_id, worker_id = self.id, "Worker started");

        loop {
            // Unbiased: neither lane may starve the other.
            let (task, retried) = tokio::select! {
                Ok(task) = self.retry_rx.recv_async() => (task, true),
                received = self.dispatch_rx.recv_async() => match received {
                    Ok(task) => (task, false),
                    Err(_) => match self.retry_rx.try_recv() {
                        Ok(task) => (task, true),
                        Err(_) => break,
                    },
                },
            };
            self.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);

            if retried && self.cancel.is_cancelled() {
                self.abandon(&task);
                continue;
            }

            self.execute(task).await;
        }

        debug!(pool_id = %self.pool_id, worker_id = self.id, "Dispatch queue closed, worker exiting");
    }

    async fn execute(&self, mut task: T) {
        self.counters.active_tasks.fetch_add(1, Ordering::Relaxed);

        let outcome = match AssertUnwindSafe(self.handler.handle(&mut task))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => Err(anyhow!("task handler panicked: {}", panic_message(&*payload))),
        };

        self.counters.active_tasks.fetch_sub(1, Ordering::Relaxed);
        self.route(task, outcome);
    }

    /// Decide the fate of a task after one attempt.
    fn route(&self, mut task: T, outcome: Result<(), TaskError>) {
        let Err(err) = outcome else {
            task.record_error(None);
            self.counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
            debug!(
                pool_id = %self.pool_id,
                worker_id = self.id,
                failures = task.error_count(),
                "Task completed"
            );
            self.in_flight.finish();
            return;
        };

        task.record_error(Some(err));
        let failures = task.error_count();

        if self.cancel.is_cancelled() {
            self.abandon(&task);
        } else if self.retries.is_exhausted(failures) {
            warn!(
                pool_id = %self.pool_id,
                worker_id = self.id,
                attempts = failures,
                error = task.last_error().map(field::display),
                "Task exhausted retries"
            );
            self.counters.failed_tasks.fetch_add(1, Ordering::Relaxed);
            // The error output is unbounded; this only fails once the pool itself is gone.
            if self.errors_tx.send(task).is_err() {
                debug!(pool_id = %self.pool_id, "Error output closed, dropping failed task");
            }
            self.in_flight.finish();
        } else {
            debug!(
                pool_id = %self.pool_id,
                worker_id = self.id,
                attempts = failures,
                error = task.last_error().map(field::display),
                "Task failed, scheduling retry"
            );
            self.counters.retried_tasks.fetch_add(1, Ordering::Relaxed);
            self.counters.queued_tasks.fetch_add(1, Ordering::Relaxed);
            if let Err(flume::SendError(task)) = self.retry_tx.send(task) {
                self.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                self.abandon(&task);
            }
        }
    }

    /// Count a task as terminal without delivering it anywhere.
    fn abandon(&self, task: &T) {
        debug!(
            pool_id = %self.pool_id,
            worker_id = self.id,
            attempts = task.error_count(),
            "Pool cancelled, abandoning task"
        );
        self.counters.abandoned_tasks.fetch_add(1, Ordering::Relaxed);
        self.in_flight.finish();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.as_str()
    } else {
        "non-string panic payload"
    }
}
