#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Optional counters for the scheduler and frame driver.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct Metrics {
    /// Jobs accepted by `submit`.
    pub jobs_submitted: AtomicU64,
    /// Back-stage batches allocated, across all priorities.
    pub batches_allocated: AtomicU64,
    /// Groups pushed to the ready queue by `dispatch`.
    pub groups_dispatched: AtomicU64,
    /// Groups claimed and run to completion by workers.
    pub groups_executed: AtomicU64,
    /// Individual jobs executed, including ones that panicked.
    pub jobs_executed: AtomicU64,
    /// Jobs whose `execute` unwound.
    pub job_panics: AtomicU64,
    /// Frames retired by a frame driver using this scheduler.
    pub frames_completed: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

#[cfg(feature = "metrics")]
impl Metrics {
    /// Creates a new metrics instance.
    pub fn new() -> Self {
        Self {
            jobs_submitted: AtomicU64::new(0),
            batches_allocated: AtomicU64::new(0),
            groups_dispatched: AtomicU64::new(0),
            groups_executed: AtomicU64::new(0),
            jobs_executed: AtomicU64::new(0),
            job_panics: AtomicU64::new(0),
            frames_completed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            batches_allocated: self.batches_allocated.load(Ordering::Relaxed),
            groups_dispatched: self.groups_dispatched.load(Ordering::Relaxed),
            groups_executed: self.groups_executed.load(Ordering::Relaxed),
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            job_panics: self.job_panics.load(Ordering::Relaxed),
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(feature = "metrics")]
impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub batches_allocated: u64,
    pub groups_dispatched: u64,
    pub groups_executed: u64,
    pub jobs_executed: u64,
    pub job_panics: u64,
    pub frames_completed: u64,
    pub elapsed_seconds: f64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Calculates jobs per second throughput.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_executed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Groups dispatched but not yet executed.
    pub fn groups_in_flight(&self) -> i64 {
        self.groups_dispatched as i64 - self.groups_executed as i64
    }
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_submitted, 0);
        assert_eq!(snapshot.groups_dispatched, 0);
        assert_eq!(snapshot.frames_completed, 0);
        assert!(snapshot.elapsed_seconds >= 0.0);
    }

    #[test]
    fn test_metrics_updates() {
        let metrics = Metrics::new();

        metrics.groups_dispatched.fetch_add(10, Ordering::Relaxed);
        metrics.groups_executed.fetch_add(8, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.groups_in_flight(), 2);
    }

    #[test]
    fn test_throughput_calculation() {
        let metrics = Metrics::new();
        metrics.jobs_executed.fetch_add(100, Ordering::Relaxed);

        thread::sleep(Duration::from_millis(10));
        let snapshot = metrics.snapshot();

        assert!(snapshot.jobs_per_second() > 0.0);
    }
}
