//! Counter-based synchronization for tracking job completion.
//!
//! Jobs are fire-and-forget once dispatched. A [`Counter`] shared between the
//! producer and its jobs is the usual way to find out when a known number of
//! them has finished.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const MAX_BACKOFF_US: u64 = 1000;

/// A thread-safe countdown for tracking job completion.
#[derive(Clone, Debug)]
pub struct Counter {
    inner: Arc<AtomicUsize>,
}

impl Counter {
    /// Creates a new counter with the specified initial value.
    pub fn new(initial: usize) -> Self {
        Counter {
            inner: Arc::new(AtomicUsize::new(initial)),
        }
    }

    /// Increments the counter by one.
    pub fn increment(&self) {
        self.inner.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrements the counter by one.
    ///
    /// Returns true if this call brought the counter to zero. Decrementing a
    /// counter that is already zero leaves it at zero and returns false.
    pub fn decrement(&self) -> bool {
        // AcqRel so the thread that observes zero also sees every other
        // decrementer's prior writes.
        let previous = self
            .inner
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));
        matches!(previous, Ok(1))
    }

    /// Returns the current value of the counter.
    pub fn value(&self) -> usize {
        self.inner.load(Ordering::SeqCst)
    }

    /// Checks if the counter has reached zero.
    pub fn is_complete(&self) -> bool {
        self.value() == 0
    }

    /// Overwrites the current value.
    pub fn reset(&self, value: usize) {
        self.inner.store(value, Ordering::SeqCst);
    }

    /// Blocks the calling thread until the counter reaches zero or `timeout`
    /// elapses. Returns true if the counter completed.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut backoff_us = 1;

        while !self.is_complete() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_micros(backoff_us));
            backoff_us = (backoff_us * 2).min(MAX_BACKOFF_US);
        }
        true
    }
}
