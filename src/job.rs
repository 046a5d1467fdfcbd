//! Job definitions.
//!
//! A [`Job`] is the unit of work handed to the scheduler. Producers submit
//! jobs one at a time; the scheduler accumulates them into per-priority
//! [`JobBatch`]es and turns each non-empty batch into an immutable
//! [`JobGroup`] at dispatch time. A group always runs start to finish on a
//! single worker.

use crate::counter::Counter;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Scheduling priority of a job.
///
/// Numerically larger priorities are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i32);

impl Priority {
    pub const LOW: Priority = Priority(0);
    pub const DEFAULT: Priority = Priority(5);
    pub const HIGH: Priority = Priority(10);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of work that can be executed by the scheduler's workers.
///
/// Submission does not consume the job: the same object may be submitted
/// again once its previous execution has finished. Anything `execute` needs
/// must be bound to the job before it is submitted.
pub trait Job: Send + Sync {
    /// Priority of this job. Must not change between submissions.
    fn priority(&self) -> Priority {
        Priority::DEFAULT
    }

    /// Runs the job once on the worker identified by `worker_id`.
    fn execute(&self, worker_id: usize);
}

/// Shared handle to a submitted job.
pub type JobRef = Arc<dyn Job>;

type Work = dyn Fn(usize) + Send + Sync + 'static;

/// A job backed by a closure.
///
/// The closure receives the id of the worker running it. An optional
/// [`Counter`] is decremented after every execution, including executions
/// that panic.
pub struct FnJob {
    work: Box<Work>,
    priority: Priority,
    counter: Option<Counter>,
}

impl FnJob {
    /// Creates a new job at the default priority.
    pub fn new<F>(work: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        FnJob {
            work: Box::new(work),
            priority: Priority::DEFAULT,
            counter: None,
        }
    }

    /// Creates a new job with an associated counter.
    pub fn with_counter<F>(work: F, counter: Counter) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        FnJob {
            work: Box::new(work),
            priority: Priority::DEFAULT,
            counter: Some(counter),
        }
    }

    /// Sets the priority of this job.
    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Wraps the job in a shareable handle ready for submission.
    pub fn into_ref(self) -> JobRef {
        Arc::new(self)
    }
}

impl Job for FnJob {
    fn priority(&self) -> Priority {
        self.priority
    }

    fn execute(&self, worker_id: usize) {
        let _guard = self.counter.as_ref().map(CounterGuard);
        (self.work)(worker_id);
    }
}

impl fmt::Debug for FnJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnJob")
            .field("priority", &self.priority)
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

/// Decrements the wrapped counter when dropped, so unwinding still counts.
struct CounterGuard<'a>(&'a Counter);

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Producer-side accumulation bucket.
///
/// Lives only inside the scheduler's back stage. Batches are ordered by their
/// current length (ties broken by allocation id) so a min-heap of batches
/// always yields the least loaded one first.
pub(crate) struct JobBatch {
    id: u64,
    jobs: Vec<JobRef>,
}

impl JobBatch {
    pub(crate) fn new(id: u64, capacity: usize) -> Self {
        JobBatch {
            id,
            jobs: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub(crate) fn push(&mut self, job: JobRef) {
        self.jobs.push(job);
    }

    pub(crate) fn into_group(self, priority: Priority) -> JobGroup {
        JobGroup::new(priority, self.jobs)
    }
}

impl PartialEq for JobBatch {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for JobBatch {}

impl PartialOrd for JobBatch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JobBatch {
    fn cmp(&self, other: &Self) -> Ordering {
        self.len()
            .cmp(&other.len())
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// An immutable, dispatch-ready bundle of jobs at a single priority.
pub struct JobGroup {
    priority: Priority,
    jobs: Vec<JobRef>,
}

impl JobGroup {
    pub(crate) fn new(priority: Priority, jobs: Vec<JobRef>) -> Self {
        JobGroup { priority, jobs }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs in the order they were submitted.
    pub fn jobs(&self) -> &[JobRef] {
        &self.jobs
    }

    /// Executes every job in stored order on the calling thread.
    pub fn run(&self, worker_id: usize) {
        for job in &self.jobs {
            job.execute(worker_id);
        }
    }
}

impl fmt::Debug for JobGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobGroup")
            .field("priority", &self.priority)
            .field("jobs", &self.jobs.len())
            .finish()
    }
}
