//! Task capability contract and the reusable header that satisfies it.
//!
//! Every unit of work handed to a [`WorkerPool`](crate::core::WorkerPool) carries
//! its own error history. The pool reads that history to decide between a retry
//! and delivery to the error output.
//!
//! User types usually embed a [`TaskHeader`] and expose it through `AsRef`/`AsMut`,
//! which makes them a [`Task`] through the blanket implementation:
//!
//! ```rust
//! use prometheus_retry_pool::core::{Task, TaskHeader};
//!
//! struct Download {
//!     header: TaskHeader,
//!     url: String,
//! }
//!
//! impl AsRef<TaskHeader> for Download {
//!     fn as_ref(&self) -> &TaskHeader {
//!         &self.header
//!     }
//! }
//!
//! impl AsMut<TaskHeader> for Download {
//!     fn as_mut(&mut self) -> &mut TaskHeader {
//!         &mut self.header
//!     }
//! }
//!
//! let mut job = Download { header: TaskHeader::new(), url: "https://example.com".into() };
//! job.record_error(Some(anyhow::anyhow!("connection reset")));
//! assert_eq!(job.error_count(), 1);
//! ```

/// Error produced by a task handler and recorded on the task.
pub type TaskError = anyhow::Error;

/// Capabilities every task submitted to the pool must provide.
///
/// The pool moves a task by value between its stages, so these methods are
/// never called from two threads at once for the same task. The pool itself
/// additionally requires `Send + 'static`; the contract does not, so a handler
/// holding `&mut T` can call these methods directly.
pub trait Task {
    /// Record the outcome of one attempt.
    ///
    /// `Some(err)` increments the error count and stores `err` as the last error.
    /// `None` clears the last error and leaves the count unchanged.
    fn record_error(&mut self, err: Option<TaskError>);

    /// Number of failed attempts recorded so far. Never decreases.
    fn error_count(&self) -> u32;

    /// The most recently recorded error, or `None` if none was recorded or it was cleared.
    fn last_error(&self) -> Option<&TaskError>;

    /// The last error as a plain [`std::error::Error`], for walking its source chain
    /// or downcasting to the concrete failure type.
    fn error_source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.last_error()
            .map(AsRef::<dyn std::error::Error + Send + Sync + 'static>::as_ref)
    }
}

/// Reusable error bookkeeping intended to be embedded in user task types.
#[derive(Debug, Default)]
pub struct TaskHeader {
    errors: u32,
    last_error: Option<TaskError>,
}

impl TaskHeader {
    /// Create a header with no recorded errors.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            errors: 0,
            last_error: None,
        }
    }
}

impl AsRef<Self> for TaskHeader {
    fn as_ref(&self) -> &Self {
        self
    }
}

impl AsMut<Self> for TaskHeader {
    fn as_mut(&mut self) -> &mut Self {
        self
    }
}

impl<T> Task for T
where
    T: AsRef<TaskHeader> + AsMut<TaskHeader>,
{
    fn record_error(&mut self, err: Option<TaskError>) {
        let header: &mut TaskHeader = self.as_mut();
        if err.is_some() {
            header.errors = header.errors.saturating_add(1);
        }
        header.last_error = err;
    }

    fn error_count(&self) -> u32 {
        AsRef::<TaskHeader>::as_ref(self).errors
    }

    fn last_error(&self) -> Option<&TaskError> {
        AsRef::<TaskHeader>::as_ref(self).last_error.as_ref()
    }
}
