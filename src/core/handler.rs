//! Work function abstraction invoked by pool workers.

use async_trait::async_trait;

use super::task::{Task, TaskError};

/// Executes one attempt of a task.
///
/// This is the work function of a [`WorkerPool`](crate::core::WorkerPool). Each
/// worker thread holds its own clone and drives `handle` on a dedicated
/// single-threaded tokio runtime, so CPU-bound or blocking work does not stall
/// the caller's runtime.
///
/// The handler may be called many times on the same task (once per attempt) and
/// must not keep a reference to it beyond the call.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_retry_pool::core::{TaskError, TaskHandler};
///
/// #[derive(Clone)]
/// struct Fetcher {
///     client: reqwest::Client,
/// }
///
/// #[async_trait]
/// impl TaskHandler<Download> for Fetcher {
///     async fn handle(&self, task: &mut Download) -> Result<(), TaskError> {
///         let body = self.client.get(&task.url).send().await?.bytes().await?;
///         task.size = body.len();
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait TaskHandler<T: Task + Send + 'static>: Send + Sync + Clone + 'static {
    /// Run one attempt. An `Err` is recorded on the task and drives the retry policy.
    async fn handle(&self, task: &mut T) -> Result<(), TaskError>;
}

/// [`TaskHandler`] backed by a synchronous closure. Build one with [`handler_fn`].
#[derive(Debug, Clone)]
pub struct FnHandler<F> {
    f: F,
}

/// Adapt a synchronous closure into a [`TaskHandler`].
///
/// ```rust
/// use prometheus_retry_pool::core::{handler_fn, TaskError, TaskHeader};
///
/// let handler = handler_fn(|_task: &mut TaskHeader| Ok::<(), TaskError>(()));
/// # let _ = handler;
/// ```
pub const fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler { f }
}

#[async_trait]
impl<T, F> TaskHandler<T> for FnHandler<F>
where
    T: Task + Send + 'static,
    F: Fn(&mut T) -> Result<(), TaskError> + Send + Sync + Clone + 'static,
{
    async fn handle(&self, task: &mut T) -> Result<(), TaskError> {
        (self.f)(task)
    }
}
