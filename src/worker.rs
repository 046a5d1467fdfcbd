//! Worker thread implementation.
//!
//! Each worker repeatedly claims one [`JobGroup`] from the ready queue and runs
//! every job in it back to back. When nothing is ready it sleeps briefly
//! instead of spinning, so it stays responsive to termination requests.
//!
//! State machine: Idle -> Executing -> Idle -> ... -> (Draining) -> Stopped.
//! Immediate termination is observed between groups, never mid-job. Drain
//! termination is observed only once the queue has been found empty.

#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
use crate::job::JobGroup;
use crate::ready_queue::ReadyQueue;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, trace};

#[derive(Debug, Clone, Copy)]
struct WorkerFlags {
    running: bool,
    drain_before_stop: bool,
}

/// Termination flags of a single worker, guarded by a lock private to it.
///
/// Written only by the owning scheduler through [`WorkerControl::terminate`],
/// read by the worker on every loop iteration.
#[derive(Debug)]
pub struct WorkerControl {
    flags: Mutex<WorkerFlags>,
}

impl WorkerControl {
    pub fn new() -> Self {
        WorkerControl {
            flags: Mutex::new(WorkerFlags {
                running: true,
                drain_before_stop: false,
            }),
        }
    }

    /// Requests termination.
    ///
    /// With `drain_existing` the worker keeps claiming groups until the ready
    /// queue is empty; otherwise it stops after its current group.
    pub fn terminate(&self, drain_existing: bool) {
        let mut flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        if drain_existing {
            flags.drain_before_stop = true;
        } else {
            flags.running = false;
        }
    }

    fn flags(&self) -> WorkerFlags {
        *self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WorkerControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a worker thread needs besides its own control flags.
pub struct WorkerContext {
    pub queue: Arc<ReadyQueue>,
    pub idle_sleep: Duration,
    pub pin_to_core: bool,
    #[cfg(feature = "metrics")]
    pub metrics: Arc<Metrics>,
}

impl WorkerContext {
    fn job_finished(&self, panicked: bool) {
        #[cfg(feature = "metrics")]
        {
            use std::sync::atomic::Ordering;
            self.metrics.jobs_executed.fetch_add(1, Ordering::Relaxed);
            if panicked {
                self.metrics.job_panics.fetch_add(1, Ordering::Relaxed);
            }
        }
        #[cfg(not(feature = "metrics"))]
        let _ = panicked;
    }

    fn group_finished(&self) {
        #[cfg(feature = "metrics")]
        self.metrics
            .groups_executed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}

/// A worker thread that executes job groups from the ready queue.
pub struct Worker {
    id: usize,
    control: Arc<WorkerControl>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Creates and starts a new worker thread.
    ///
    /// `id` is the value handed to every job this worker runs.
    pub fn spawn(id: usize, context: Arc<WorkerContext>) -> std::io::Result<Self> {
        let control = Arc::new(WorkerControl::new());
        let thread_control = Arc::clone(&control);

        let handle = thread::Builder::new()
            .name(format!("lockstep-worker-{id}"))
            .spawn(move || {
                if context.pin_to_core {
                    pin_current_thread(id);
                }
                Worker::run_loop(id, &context, &thread_control);
            })?;

        Ok(Worker {
            id,
            control,
            handle: Some(handle),
        })
    }

    fn run_loop(id: usize, context: &WorkerContext, control: &WorkerControl) {
        loop {
            let flags = control.flags();
            if !flags.running {
                break;
            }

            match context.queue.take() {
                Some(group) => {
                    trace!(worker = id, priority = %group.priority(), jobs = group.len(), "executing group");
                    Worker::run_group(id, &group, context);
                }
                None if flags.drain_before_stop => break,
                None => thread::sleep(context.idle_sleep),
            }
        }
        trace!(worker = id, "worker stopped");
    }

    fn run_group(id: usize, group: &JobGroup, context: &WorkerContext) {
        for job in group.jobs() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| job.execute(id)));
            context.job_finished(result.is_err());

            if let Err(payload) = result {
                error!(
                    worker = id,
                    priority = %group.priority(),
                    "job panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
        context.group_finished();
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Signals the worker to stop. Does not wait for it.
    pub fn terminate(&self, drain_existing: bool) {
        self.control.terminate(drain_existing);
    }

    /// Waits for the worker thread to finish.
    pub fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

fn pin_current_thread(id: usize) {
    if let Some(core_ids) = core_affinity::get_core_ids()
        && let Some(core) = core_ids.get(id.saturating_sub(1))
        && !core_affinity::set_for_current(*core)
    {
        tracing::warn!(worker = id, core = core.id, "failed to pin worker thread");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
