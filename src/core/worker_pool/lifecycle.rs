//! In-flight accounting that gates `wait` and `shutdown`.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Counts tasks that were admitted but have not reached a terminal outcome.
///
/// Waiters block on the Condvar until the count drops to zero. There is no polling.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    count: Mutex<usize>,
    drained: Condvar,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Count one more admitted task. Must happen before the task becomes visible to workers.
    pub(crate) fn admit(&self) {
        *self.count.lock() += 1;
    }

    /// Mark one task terminal and wake waiters when nothing is left.
    pub(crate) fn finish(&self) {
        let mut count = self.count.lock();
        debug_assert!(*count > 0, "in-flight underflow");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    pub(crate) fn current(&self) -> usize {
        *self.count.lock()
    }

    /// Block until the count reaches zero.
    pub(crate) fn wait_drained(&self) {
        let mut count = self.count.lock();
        self.drained.wait_while(&mut count, |c| *c > 0);
    }

    /// Block until the count reaches zero or `timeout` elapses. Returns `true` if drained.
    pub(crate) fn wait_drained_for(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        !self
            .drained
            .wait_while_for(&mut count, |c| *c > 0, timeout)
            .timed_out()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_returns_immediately_when_empty() {
        let in_flight = InFlight::new();
        in_flight.wait_drained();
        assert!(in_flight.wait_drained_for(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_times_out_while_tasks_remain() {
        let in_flight = InFlight::new();
        in_flight.admit();
        assert!(!in_flight.wait_drained_for(Duration::from_millis(20)));
        assert_eq!(in_flight.current(), 1);
    }

    #[test]
    fn test_finish_wakes_all_waiters() {
        let in_flight = Arc::new(InFlight::new());
        in_flight.admit();
        in_flight.admit();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let in_flight = Arc::clone(&in_flight);
                thread::spawn(move || in_flight.wait_drained())
            })
            .collect();

        in_flight.finish();
        in_flight.finish();

        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(in_flight.current(), 0);
    }
}
