//! The job scheduler.
//!
//! Work moves through two stages:
//!
//! - the **back stage**, visible only to producers: for every priority a
//!   min-heap of [`JobBatch`]es ordered by size. `submit` always appends to
//!   the smallest batch, which spreads a priority level evenly over the
//!   workers.
//! - the **front stage**, a [`ReadyQueue`] of immutable [`JobGroup`]s that
//!   workers claim one at a time. `dispatch` turns every non-empty batch into
//!   exactly one group.
//!
//! The back stage and the lifecycle flags share one mutex. The ready queue is
//! synchronized on its own, so workers never touch the scheduler lock.

use crate::error::SchedulerError;
use crate::job::{JobBatch, JobGroup, JobRef, Priority};
#[cfg(feature = "metrics")]
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::ready_queue::ReadyQueue;
use crate::worker::{Worker, WorkerContext};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info};

/// Smallest supported worker pool.
pub const MIN_WORKERS: usize = 1;
/// Largest supported worker pool.
pub const MAX_WORKERS: usize = 256;
/// Default capacity of a single back-stage batch.
pub const DEFAULT_MAX_JOBS_PER_GROUP: usize = 100;

/// Configuration for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads, clamped to `[MIN_WORKERS, MAX_WORKERS]`.
    /// Default: number of logical CPUs.
    pub num_workers: usize,
    /// Most jobs a single group may carry. Default: 100.
    pub max_jobs_per_group: usize,
    /// How long an idle worker sleeps before polling again. Default: 1ms.
    pub idle_sleep_us: u64,
    /// Pin worker `i` to logical core `i - 1`. Default: false.
    pub pin_workers: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            max_jobs_per_group: DEFAULT_MAX_JOBS_PER_GROUP,
            idle_sleep_us: 1000,
            pin_workers: false,
        }
    }
}

impl SchedulerConfig {
    /// Default configuration with an explicit worker count.
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_micros(self.idle_sleep_us)
    }

    fn clamped(mut self) -> Self {
        self.num_workers = self.num_workers.clamp(MIN_WORKERS, MAX_WORKERS);
        self.max_jobs_per_group = self.max_jobs_per_group.max(1);
        self
    }
}

/// Back-stage batches of one priority level.
#[derive(Default)]
struct PriorityBuffer {
    batches: BinaryHeap<Reverse<JobBatch>>,
    allocated: usize,
}

impl PriorityBuffer {
    fn grow(&mut self, count: usize, capacity: usize, next_id: &mut u64) {
        for _ in 0..count {
            self.batches.push(Reverse(JobBatch::new(*next_id, capacity)));
            *next_id += 1;
        }
        self.allocated += count;
    }
}

#[derive(Default)]
struct SchedulerState {
    started: bool,
    buffers: HashMap<Priority, PriorityBuffer>,
    next_batch_id: u64,
    workers: Vec<Worker>,
    /// Workers signalled by `stop` that nobody has joined yet.
    retired: Vec<Worker>,
}

/// Fixed-size worker pool with priority-bucketed, load-balanced queuing.
///
/// Lifecycle: [`start`](Scheduler::start) spawns the workers,
/// [`submit`](Scheduler::submit) buffers jobs, [`dispatch`](Scheduler::dispatch)
/// publishes them, [`stop`](Scheduler::stop) signals the workers and
/// [`join`](Scheduler::join) waits for them.
///
/// Stopping without draining leaves unclaimed groups in the ready queue and
/// buffered jobs in the back stage; nothing runs them until the next
/// `start`. Callers that cannot lose work must stop with
/// `drain_existing = true` after their final dispatch.
pub struct Scheduler {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    ready: Arc<ReadyQueue>,
    #[cfg(feature = "metrics")]
    metrics: Arc<Metrics>,
}

impl Scheduler {
    /// Creates a scheduler with `num_workers` workers (clamped to 1..=256).
    ///
    /// Nothing is spawned until [`start`](Scheduler::start).
    ///
    /// # Example
    ///
    /// ```
    /// use lockstep::{FnJob, Scheduler};
    ///
    /// let scheduler = Scheduler::new(4);
    /// scheduler.start().unwrap();
    /// scheduler.submit(FnJob::new(|worker| println!("hello from worker {worker}")).into_ref()).unwrap();
    /// scheduler.dispatch().unwrap();
    /// scheduler.stop(true).unwrap();
    /// scheduler.join().unwrap();
    /// ```
    pub fn new(num_workers: usize) -> Self {
        Self::with_config(SchedulerConfig::with_workers(num_workers))
    }

    /// Creates a scheduler from a full configuration.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Scheduler {
            config: config.clamped(),
            state: Mutex::new(SchedulerState::default()),
            ready: Arc::new(ReadyQueue::new()),
            #[cfg(feature = "metrics")]
            metrics: Arc::new(Metrics::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns exactly `num_workers` workers.
    ///
    /// Fails with [`SchedulerError::AlreadyStarted`] if already running. May be
    /// called again after [`stop`](Scheduler::stop).
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut state = self.lock();
        if state.started {
            return Err(SchedulerError::AlreadyStarted);
        }

        let context = Arc::new(WorkerContext {
            queue: Arc::clone(&self.ready),
            idle_sleep: self.config.idle_sleep(),
            pin_to_core: self.config.pin_workers,
            #[cfg(feature = "metrics")]
            metrics: Arc::clone(&self.metrics),
        });

        let mut workers = Vec::with_capacity(self.config.num_workers);
        for id in 1..=self.config.num_workers {
            match Worker::spawn(id, Arc::clone(&context)) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    for worker in workers.drain(..) {
                        worker.terminate(false);
                        state.retired.push(worker);
                    }
                    error!(worker = id, "failed to spawn worker: {e}");
                    return Err(SchedulerError::Spawn(e.to_string()));
                }
            }
        }

        state.workers = workers;
        state.started = true;
        info!(workers = self.config.num_workers, "scheduler started");
        Ok(())
    }

    /// Signals every worker to terminate.
    ///
    /// With `drain_existing` the workers keep going until the ready queue is
    /// empty; otherwise each one exits after its current group and unclaimed
    /// groups are abandoned. Does not wait for the threads: use
    /// [`join`](Scheduler::join) for that.
    pub fn stop(&self, drain_existing: bool) -> Result<(), SchedulerError> {
        let mut state = self.lock();
        if !state.started {
            return Err(SchedulerError::NotStarted);
        }

        state.started = false;
        let workers = std::mem::take(&mut state.workers);
        for worker in workers {
            worker.terminate(drain_existing);
            state.retired.push(worker);
        }
        info!(drain = drain_existing, "scheduler stopped");
        Ok(())
    }

    /// Waits for every worker signalled by a previous `stop` to exit.
    ///
    /// Returns [`SchedulerError::WorkersPanicked`] if any of them died.
    pub fn join(&self) -> Result<(), SchedulerError> {
        let retired = std::mem::take(&mut self.lock().retired);
        join_workers(retired)
    }

    /// Buffers a job in the back stage.
    ///
    /// The job lands in the least loaded batch of its priority. If that batch
    /// is already full, `num_workers` fresh batches are added and the
    /// submission is retried; capacity growth is never reported to the caller.
    pub fn submit(&self, job: JobRef) -> Result<(), SchedulerError> {
        let mut state = self.lock();
        if !state.started {
            return Err(SchedulerError::NotStarted);
        }
        self.enqueue(&mut state, job);
        Ok(())
    }

    /// Buffers several jobs under a single lock acquisition.
    pub fn submit_all<I>(&self, jobs: I) -> Result<(), SchedulerError>
    where
        I: IntoIterator<Item = JobRef>,
    {
        let mut state = self.lock();
        if !state.started {
            return Err(SchedulerError::NotStarted);
        }
        for job in jobs {
            self.enqueue(&mut state, job);
        }
        Ok(())
    }

    fn enqueue(&self, state: &mut SchedulerState, job: JobRef) {
        let priority = job.priority();
        let capacity = self.config.max_jobs_per_group;
        let grow_by = self.config.num_workers;

        let SchedulerState {
            buffers,
            next_batch_id,
            ..
        } = state;
        let buffer = buffers.entry(priority).or_default();

        if buffer.batches.is_empty() {
            self.grow(buffer, priority, grow_by, capacity, next_batch_id);
        }

        loop {
            if let Some(mut smallest) = buffer.batches.peek_mut()
                && smallest.0.len() < capacity
            {
                // PeekMut restores heap order on drop.
                smallest.0.push(job);
                break;
            }
            self.grow(buffer, priority, grow_by, capacity, next_batch_id);
        }

        #[cfg(feature = "metrics")]
        self.metrics
            .jobs_submitted
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn grow(
        &self,
        buffer: &mut PriorityBuffer,
        priority: Priority,
        count: usize,
        capacity: usize,
        next_id: &mut u64,
    ) {
        buffer.grow(count, capacity, next_id);
        debug!(%priority, added = count, total = buffer.allocated, "allocated job batches");

        #[cfg(feature = "metrics")]
        self.metrics
            .batches_allocated
            .fetch_add(count as u64, std::sync::atomic::Ordering::Relaxed);
    }

    /// Publishes buffered work to the workers.
    ///
    /// Every non-empty batch becomes exactly one [`JobGroup`]. Batches that
    /// were empty stay in the back stage; consumed batches are not replaced,
    /// so the next `submit` at that priority regrows capacity on demand.
    ///
    /// Returns the number of groups pushed to the ready queue.
    pub fn dispatch(&self) -> Result<usize, SchedulerError> {
        let mut state = self.lock();
        if !state.started {
            return Err(SchedulerError::NotStarted);
        }

        let mut dispatched = 0;
        for (&priority, buffer) in state.buffers.iter_mut() {
            let mut empty = Vec::new();
            while let Some(Reverse(batch)) = buffer.batches.pop() {
                if batch.is_empty() {
                    empty.push(Reverse(batch));
                } else {
                    self.ready.push(batch.into_group(priority));
                    dispatched += 1;
                }
            }
            buffer.batches.extend(empty);
        }

        #[cfg(feature = "metrics")]
        self.metrics
            .groups_dispatched
            .fetch_add(dispatched as u64, std::sync::atomic::Ordering::Relaxed);

        debug!(groups = dispatched, "dispatched job groups");
        Ok(dispatched)
    }

    /// Claims the highest-priority ready group without blocking.
    pub fn take(&self) -> Option<JobGroup> {
        self.ready.take()
    }

    /// Number of worker threads this scheduler runs when started.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    /// Jobs buffered in the back stage and not yet dispatched.
    pub fn pending_jobs(&self) -> usize {
        self.lock()
            .buffers
            .values()
            .flat_map(|buffer| buffer.batches.iter())
            .map(|Reverse(batch)| batch.len())
            .sum()
    }

    /// Total number of batches ever allocated at `priority`.
    pub fn batches_allocated(&self, priority: Priority) -> usize {
        self.lock()
            .buffers
            .get(&priority)
            .map_or(0, |buffer| buffer.allocated)
    }

    /// Sizes of the batches currently held at `priority`, ascending.
    pub fn pending_batch_sizes(&self, priority: Priority) -> Vec<usize> {
        let state = self.lock();
        let mut sizes: Vec<usize> = state
            .buffers
            .get(&priority)
            .map(|buffer| buffer.batches.iter().map(|Reverse(b)| b.len()).collect())
            .unwrap_or_default();
        sizes.sort_unstable();
        sizes
    }

    /// Groups in the ready queue that no worker has claimed yet.
    pub fn ready_groups(&self) -> usize {
        self.ready.len()
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn metrics_handle(&self) -> &Metrics {
        &self.metrics
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let mut workers = std::mem::take(&mut state.retired);
        for worker in state.workers.drain(..) {
            worker.terminate(false);
            workers.push(worker);
        }
        state.started = false;

        if let Err(e) = join_workers(workers) {
            error!("{e}");
        }
    }
}

fn join_workers(workers: Vec<Worker>) -> Result<(), SchedulerError> {
    let mut failed_count = 0;
    for worker in workers {
        let worker_id = worker.id();
        if worker.join().is_err() {
            failed_count += 1;
            error!(worker = worker_id, "worker thread panicked");
        }
    }

    if failed_count > 0 {
        Err(SchedulerError::WorkersPanicked(failed_count))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::Counter;
    use crate::job::FnJob;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn noop(priority: i32) -> JobRef {
        FnJob::new(|_| {}).with_priority(priority).into_ref()
    }

    #[test]
    fn test_worker_count_is_clamped() {
        assert_eq!(Scheduler::new(0).num_workers(), MIN_WORKERS);
        assert_eq!(Scheduler::new(1000).num_workers(), MAX_WORKERS);
        assert_eq!(Scheduler::new(8).num_workers(), 8);
    }

    #[test]
    fn test_lifecycle_errors() {
        let scheduler = Scheduler::new(2);
        assert_eq!(scheduler.submit(noop(5)), Err(SchedulerError::NotStarted));
        assert_eq!(scheduler.dispatch(), Err(SchedulerError::NotStarted));
        assert_eq!(scheduler.stop(false), Err(SchedulerError::NotStarted));
        assert_eq!(scheduler.pending_jobs(), 0);

        scheduler.start().unwrap();
        assert_eq!(scheduler.start(), Err(SchedulerError::AlreadyStarted));
        assert!(scheduler.is_started());

        scheduler.stop(false).unwrap();
        assert!(!scheduler.is_started());
        assert_eq!(scheduler.stop(true), Err(SchedulerError::NotStarted));
        scheduler.join().unwrap();
    }

    #[test]
    fn test_restart_after_stop() {
        let scheduler = Scheduler::new(2);
        scheduler.start().unwrap();
        scheduler.stop(false).unwrap();
        scheduler.start().unwrap();

        let counter = Counter::new(1);
        scheduler
            .submit(FnJob::with_counter(|_| {}, counter.clone()).into_ref())
            .unwrap();
        scheduler.dispatch().unwrap();
        assert!(counter.wait(Duration::from_secs(5)));

        scheduler.stop(true).unwrap();
        scheduler.join().unwrap();
    }

    #[test]
    fn test_first_submit_allocates_one_batch_per_worker() {
        let scheduler = Scheduler::new(3);
        scheduler.start().unwrap();
        scheduler.submit(noop(5)).unwrap();

        assert_eq!(scheduler.batches_allocated(Priority(5)), 3);
        assert_eq!(scheduler.pending_batch_sizes(Priority(5)), vec![0, 0, 1]);
        assert_eq!(scheduler.batches_allocated(Priority(6)), 0);
        scheduler.stop(false).unwrap();
    }

    #[test]
    fn test_submissions_are_load_balanced() {
        let scheduler = Scheduler::new(4);
        scheduler.start().unwrap();
        for _ in 0..37 {
            scheduler.submit(noop(5)).unwrap();
        }

        let sizes = scheduler.pending_batch_sizes(Priority(5));
        assert_eq!(sizes.len(), 4);
        assert_eq!(sizes.iter().sum::<usize>(), 37);
        assert!(sizes[3] - sizes[0] <= 1, "unbalanced batches: {sizes:?}");
        scheduler.stop(false).unwrap();
    }

    #[test]
    fn test_full_batches_trigger_growth() {
        let config = SchedulerConfig {
            num_workers: 2,
            max_jobs_per_group: 3,
            ..Default::default()
        };
        let scheduler = Scheduler::with_config(config);
        scheduler.start().unwrap();

        for _ in 0..6 {
            scheduler.submit(noop(1)).unwrap();
        }
        assert_eq!(scheduler.batches_allocated(Priority(1)), 2);

        scheduler.submit(noop(1)).unwrap();
        assert_eq!(scheduler.batches_allocated(Priority(1)), 4);
        assert_eq!(scheduler.pending_batch_sizes(Priority(1)), vec![0, 1, 3, 3]);
        scheduler.stop(false).unwrap();
    }

    #[test]
    fn test_dispatch_keeps_only_empty_batches() {
        let scheduler = Scheduler::new(4);
        scheduler.start().unwrap();
        scheduler.submit(noop(5)).unwrap();
        scheduler.submit(noop(5)).unwrap();
        assert_eq!(scheduler.pending_batch_sizes(Priority(5)), vec![0, 0, 1, 1]);

        assert_eq!(scheduler.dispatch().unwrap(), 2);
        assert_eq!(scheduler.pending_batch_sizes(Priority(5)), vec![0, 0]);
        assert_eq!(scheduler.pending_jobs(), 0);
        scheduler.stop(true).unwrap();
        scheduler.join().unwrap();
    }

    #[test]
    fn test_capacity_not_replenished_by_dispatch() {
        let scheduler = Scheduler::new(4);
        scheduler.start().unwrap();
        for _ in 0..4 {
            scheduler.submit(noop(5)).unwrap();
        }
        assert_eq!(scheduler.dispatch().unwrap(), 4);
        assert!(scheduler.pending_batch_sizes(Priority(5)).is_empty());

        // The drained level regrows on the next submission.
        scheduler.submit(noop(5)).unwrap();
        assert_eq!(scheduler.batches_allocated(Priority(5)), 8);
        scheduler.stop(false).unwrap();
    }

    #[test]
    fn test_jobs_run_on_workers() {
        let scheduler = Scheduler::new(4);
        scheduler.start().unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Counter::new(100);
        let jobs = (0..100).map(|_| {
            let hits = hits.clone();
            FnJob::with_counter(
                move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                },
                counter.clone(),
            )
            .into_ref()
        });
        scheduler.submit_all(jobs).unwrap();
        assert_eq!(scheduler.pending_jobs(), 100);
        scheduler.dispatch().unwrap();

        assert!(counter.wait(Duration::from_secs(5)));
        assert_eq!(hits.load(Ordering::SeqCst), 100);
        assert_eq!(scheduler.pending_jobs(), 0);

        scheduler.stop(true).unwrap();
        scheduler.join().unwrap();
    }

    #[test]
    fn test_drop_stops_running_workers() {
        let scheduler = Scheduler::new(2);
        scheduler.start().unwrap();
        drop(scheduler);
    }
}
