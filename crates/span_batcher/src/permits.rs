use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Pool of permits bounding concurrent asynchronous exports.
///
/// Permits are identified by `1..=max_in_flight` and recycled FIFO. A
/// parallel flag vector tracks whether an identifier currently sits in the
/// free queue, so a duplicate release (a misbehaving exporter invoking a
/// completion callback twice) cannot corrupt the queue.
#[derive(Debug)]
pub(crate) struct ExportPermits {
    state: Mutex<PermitState>,
    available: Condvar,
    max_in_flight: usize,
}

#[derive(Debug)]
struct PermitState {
    free: VecDeque<usize>,
    /// `in_queue[id - 1]` is true while `id` sits in `free`.
    in_queue: Vec<bool>,
}

impl ExportPermits {
    pub(crate) fn new(max_in_flight: usize) -> Self {
        Self {
            state: Mutex::new(PermitState {
                free: (1..=max_in_flight).collect(),
                in_queue: vec![true; max_in_flight],
            }),
            available: Condvar::new(),
            max_in_flight,
        }
    }

    /// Wait up to `timeout` for a free permit. Returns `None` if none freed
    /// up in time.
    pub(crate) fn acquire(&self, timeout: Duration) -> Option<usize> {
        let state = self.lock_state();
        let (mut state, _timed_out) = self
            .available
            .wait_timeout_while(state, timeout, |s| s.free.is_empty())
            .unwrap_or_else(PoisonError::into_inner);

        let id = state.free.pop_front()?;
        state.in_queue[id - 1] = false;
        Some(id)
    }

    /// Return a permit to the pool. Releasing an identifier that is already
    /// home is a no-op.
    pub(crate) fn release(&self, id: usize) {
        debug_assert!(id >= 1 && id <= self.max_in_flight, "unknown permit {id}");
        if id == 0 || id > self.max_in_flight {
            return;
        }

        {
            let mut state = self.lock_state();
            if !state.in_queue[id - 1] {
                state.free.push_back(id);
                state.in_queue[id - 1] = true;
            }
        }
        self.available.notify_all();
    }

    /// Wake every waiter so it re-checks its condition.
    pub(crate) fn notify_waiters(&self) {
        drop(self.lock_state());
        self.available.notify_all();
    }

    /// Wait until every permit is back in the pool, i.e. no export is in
    /// flight. A zero `timeout` waits indefinitely. Returns true if the pool
    /// went idle.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let state = self.lock_state();
        if timeout.is_zero() {
            let _state = self
                .available
                .wait_while(state, |s| s.free.len() < self.max_in_flight)
                .unwrap_or_else(PoisonError::into_inner);
            true
        } else {
            let (_state, result) = self
                .available
                .wait_timeout_while(state, timeout, |s| s.free.len() < self.max_in_flight)
                .unwrap_or_else(PoisonError::into_inner);
            !result.timed_out()
        }
    }

    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> usize {
        self.max_in_flight - self.lock_state().free.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, PermitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn permits_recycle_fifo() {
        let permits = ExportPermits::new(2);

        let first = permits.acquire(Duration::from_millis(10)).unwrap();
        let second = permits.acquire(Duration::from_millis(10)).unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(permits.outstanding(), 2);

        permits.release(second);
        permits.release(first);

        assert_eq!(permits.acquire(Duration::from_millis(10)), Some(2));
        assert_eq!(permits.acquire(Duration::from_millis(10)), Some(1));
    }

    #[test]
    fn acquire_times_out_when_exhausted() {
        let permits = ExportPermits::new(1);
        let id = permits.acquire(Duration::from_millis(10)).unwrap();

        let start = std::time::Instant::now();
        assert_eq!(permits.acquire(Duration::from_millis(50)), None);
        assert!(start.elapsed() >= Duration::from_millis(50));

        permits.release(id);
        assert!(permits.acquire(Duration::from_millis(10)).is_some());
    }

    #[test]
    fn double_release_is_ignored() {
        let permits = ExportPermits::new(2);
        let id = permits.acquire(Duration::from_millis(10)).unwrap();

        permits.release(id);
        permits.release(id);

        assert_eq!(permits.outstanding(), 0);
        // Both permits can still be acquired exactly once each.
        assert!(permits.acquire(Duration::from_millis(10)).is_some());
        assert!(permits.acquire(Duration::from_millis(10)).is_some());
        assert_eq!(permits.acquire(Duration::from_millis(10)), None);
    }

    #[test]
    fn wait_idle_observes_late_release() {
        let permits = Arc::new(ExportPermits::new(1));
        let id = permits.acquire(Duration::from_millis(10)).unwrap();

        let releaser = {
            let permits = Arc::clone(&permits);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                permits.release(id);
            })
        };

        assert!(permits.wait_idle(Duration::from_secs(2)));
        releaser.join().unwrap();
    }

    #[test]
    fn wait_idle_times_out_while_outstanding() {
        let permits = ExportPermits::new(1);
        let _id = permits.acquire(Duration::from_millis(10)).unwrap();
        assert!(!permits.wait_idle(Duration::from_millis(30)));
    }
}
