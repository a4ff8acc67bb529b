//! Tests for the task contract

use anyhow::anyhow;
use prometheus_retry_pool::core::{Task, TaskError, TaskHeader};

/// Task implementing the contract by hand instead of embedding a header.
#[derive(Default)]
struct CountingOnly {
    failures: u32,
    last: Option<TaskError>,
}

impl Task for CountingOnly {
    fn record_error(&mut self, err: Option<TaskError>) {
        if err.is_some() {
            self.failures += 1;
        }
        self.last = err;
    }

    fn error_count(&self) -> u32 {
        self.failures
    }

    fn last_error(&self) -> Option<&TaskError> {
        self.last.as_ref()
    }
}

#[test]
fn test_header_error_history() {
    let mut header = TaskHeader::new();
    header.record_error(Some(anyhow!("timeout")));
    header.record_error(None);
    header.record_error(Some(anyhow!("refused")));

    assert_eq!(header.error_count(), 2);
    assert_eq!(header.last_error().map(ToString::to_string), Some("refused".to_string()));
}

#[test]
fn test_error_count_never_decreases() {
    let mut header = TaskHeader::default();
    let mut previous = 0;
    for i in 0..10 {
        let err = (i % 3 != 0).then(|| anyhow!("attempt {i}"));
        header.record_error(err);
        assert!(header.error_count() >= previous);
        previous = header.error_count();
    }
    assert_eq!(previous, 6);
}

#[test]
fn test_custom_task_implementation() {
    let mut task = CountingOnly::default();
    task.record_error(Some(anyhow!("disk full")));
    assert_eq!(task.error_count(), 1);
    task.record_error(None);
    assert!(task.last_error().is_none());
    assert_eq!(task.error_count(), 1);
}
