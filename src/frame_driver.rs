//! Barrier-synchronized, double-buffered frame driver.
//!
//! Every frame is cut into exactly one [`RegionJob`] per worker. The driver
//! binds each job to the current `(front, back)` grid pair, submits them all,
//! dispatches, and counts completions down to zero. The worker that retires a
//! frame never starts the next one itself. While paused it only swaps the
//! buffers; otherwise it posts [`FrameEvent::Retired`] to the driver's
//! controller thread, which starts the next frame.
//!
//! All grid access goes through [`FrameDriver::lock`], which returns an
//! [`EngineGuard`] holding the engine mutex. Never keep grid data past the
//! guard: a swap may change which buffer is the front between two locks.

use crate::error::{EngineError, SchedulerError};
use crate::grid::Grid;
use crate::job::JobRef;
use crate::region::{CompletionHook, DEFAULT_MAX_AGE, LifeRule, Region, RegionJob, UpdateRule};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for a [`FrameDriver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interior grid width in cells. Default: 256.
    pub width: usize,
    /// Interior grid height in cells. Default: 256.
    pub height: usize,
    /// Highest age a cell can reach. Default: 10.
    pub max_age: u8,
    /// Worker pool driving the frames.
    pub scheduler: SchedulerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            max_age: DEFAULT_MAX_AGE,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Messages handled by the controller thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    /// Every region job of the in-flight frame has reported completion.
    Retired,
    /// The driver is shutting down.
    Shutdown,
}

struct EngineState {
    started: bool,
    paused: bool,
    previous_frame_complete: bool,
    needs_swap: bool,
    active_workers: usize,
    frames_completed: u64,
    front: Arc<Grid>,
    back: Arc<Grid>,
    regions: Vec<Arc<RegionJob>>,
    events: Option<Sender<FrameEvent>>,
}

impl EngineState {
    fn is_settled(&self) -> bool {
        !self.started || (self.previous_frame_complete && !self.needs_swap)
    }
}

struct EngineShared {
    width: usize,
    height: usize,
    rule: Arc<dyn UpdateRule>,
    scheduler: Arc<Scheduler>,
    state: Mutex<EngineState>,
    settled: Condvar,
}

impl EngineShared {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the next frame. No-op if stopped or if a frame is still in flight.
    fn run_frame(&self, state: &mut EngineState) {
        if !state.started || !state.previous_frame_complete {
            return;
        }

        Self::swap_buffers(state);
        for region in &state.regions {
            region.bind(Arc::clone(&state.front), Arc::clone(&state.back));
        }

        let jobs = state.regions.iter().map(|r| Arc::clone(r) as JobRef);
        if let Err(e) = self.scheduler.submit_all(jobs) {
            warn!("cannot start frame: {e}");
            return;
        }
        if let Err(e) = self.scheduler.dispatch() {
            warn!("cannot dispatch frame: {e}");
            return;
        }

        // Completions queue up on the engine lock held by our caller, so the
        // countdown cannot be observed before it is armed.
        state.active_workers = state.regions.len();
        state.previous_frame_complete = false;
    }

    fn swap_buffers(state: &mut EngineState) {
        if !state.started || !state.needs_swap {
            return;
        }
        std::mem::swap(&mut state.front, &mut state.back);
        state.needs_swap = false;
    }

    fn on_job_completion(&self) {
        let mut state = self.lock();
        if state.active_workers == 0 {
            warn!("region completion reported with no frame in flight");
            return;
        }

        state.active_workers -= 1;
        if state.active_workers > 0 {
            return;
        }

        state.previous_frame_complete = true;
        state.needs_swap = true;
        state.frames_completed += 1;

        #[cfg(feature = "metrics")]
        self.scheduler
            .metrics_handle()
            .frames_completed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        debug!(frame = state.frames_completed, "frame retired");
        if state.paused {
            // Readers see the new generation as soon as the frame is complete.
            Self::swap_buffers(&mut state);
            self.settled.notify_all();
        } else if let Some(events) = &state.events {
            // Unbounded channel: never blocks while the engine lock is held.
            let _ = events.send(FrameEvent::Retired);
        }
    }

    fn handle_retired(&self) {
        let mut state = self.lock();
        if state.paused {
            // Paused between the retirement and this event.
            Self::swap_buffers(&mut state);
        } else {
            self.run_frame(&mut state);
        }
        self.settled.notify_all();
    }
}

impl CompletionHook for EngineShared {
    fn job_completed(&self, _worker_id: usize) {
        self.on_job_completion();
    }
}

/// Drives a double-buffered grid simulation on top of a [`Scheduler`].
///
/// # Example
///
/// ```no_run
/// use lockstep::{EngineConfig, FrameDriver, SchedulerConfig};
/// use std::time::Duration;
///
/// let driver = FrameDriver::new(EngineConfig {
///     width: 64,
///     height: 64,
///     scheduler: SchedulerConfig::with_workers(4),
///     ..Default::default()
/// });
/// driver.start().unwrap();
///
/// {
///     let mut engine = driver.lock();
///     engine.set_cell(10, 10, 1).unwrap();
///     engine.set_cell(11, 10, 1).unwrap();
///     engine.set_cell(12, 10, 1).unwrap();
/// }
///
/// driver.step().unwrap();
/// driver.wait_until_settled(Duration::from_secs(1));
/// assert_eq!(driver.lock().get_cell(11, 11).unwrap(), 1);
/// driver.shutdown().unwrap();
/// ```
pub struct FrameDriver {
    shared: Arc<EngineShared>,
    controller: Mutex<Option<JoinHandle<()>>>,
}

impl FrameDriver {
    /// Creates a paused, stopped driver with its own scheduler.
    pub fn new(config: EngineConfig) -> Self {
        let scheduler = Arc::new(Scheduler::with_config(config.scheduler));
        let rule = Arc::new(LifeRule {
            max_age: config.max_age,
        });
        Self::with_scheduler(config.width, config.height, scheduler, rule)
    }

    /// Creates a driver over an existing scheduler and update rule.
    ///
    /// The scheduler must be dedicated to this driver. The driver starts and
    /// stops it with itself, and [`shutdown`](FrameDriver::shutdown) discards
    /// every group left in its ready queue, whoever submitted it.
    pub fn with_scheduler(
        width: usize,
        height: usize,
        scheduler: Arc<Scheduler>,
        rule: Arc<dyn UpdateRule>,
    ) -> Self {
        let state = EngineState {
            started: false,
            paused: true,
            previous_frame_complete: true,
            needs_swap: false,
            active_workers: 0,
            frames_completed: 0,
            front: Arc::new(Grid::new(width, height)),
            back: Arc::new(Grid::new(width, height)),
            regions: Vec::new(),
            events: None,
        };

        FrameDriver {
            shared: Arc::new(EngineShared {
                width,
                height,
                rule,
                scheduler,
                state: Mutex::new(state),
                settled: Condvar::new(),
            }),
            controller: Mutex::new(None),
        }
    }

    /// Starts the scheduler and the controller thread.
    ///
    /// The driver stays paused; use [`toggle_pause`](FrameDriver::toggle_pause)
    /// or [`step`](FrameDriver::step) to run frames.
    pub fn start(&self) -> Result<(), EngineError> {
        let shared = &self.shared;
        let mut state = shared.lock();
        if state.started {
            return Err(EngineError::AlreadyStarted);
        }

        match shared.scheduler.start() {
            Ok(()) | Err(SchedulerError::AlreadyStarted) => {}
            Err(e) => return Err(e.into()),
        }

        let hook: Arc<dyn CompletionHook> = Arc::clone(shared) as Arc<dyn CompletionHook>;
        let hook: Weak<dyn CompletionHook> = Arc::downgrade(&hook);
        state.regions = Region::partition(shared.width, shared.height, shared.scheduler.num_workers())
            .into_iter()
            .map(|region| Arc::new(RegionJob::new(region, Arc::clone(&shared.rule), hook.clone())))
            .collect();

        let (events, receiver) = channel::unbounded();
        let controller_shared = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name("lockstep-frame-controller".to_string())
            .spawn(move || run_controller(&controller_shared, &receiver));

        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                let _ = shared.scheduler.stop(false);
                state.regions.clear();
                return Err(EngineError::ControllerSpawn(e.to_string()));
            }
        };
        *self.controller.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        state.events = Some(events);
        state.started = true;
        state.previous_frame_complete = true;
        state.needs_swap = false;
        state.active_workers = 0;

        info!(
            width = shared.width,
            height = shared.height,
            workers = shared.scheduler.num_workers(),
            "engine started"
        );
        Ok(())
    }

    /// Stops the scheduler without draining and joins every thread.
    ///
    /// A frame in flight is abandoned; the front grid keeps the last
    /// completed generation.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        {
            let mut state = self.shared.lock();
            if !state.started {
                return Err(EngineError::NotStarted);
            }
            state.started = false;
            state.active_workers = 0;
            state.previous_frame_complete = true;
            state.needs_swap = false;
            if let Some(events) = state.events.take() {
                let _ = events.send(FrameEvent::Shutdown);
            }
            if let Err(e) = self.shared.scheduler.stop(false) {
                debug!("scheduler already stopped: {e}");
            }
            self.shared.settled.notify_all();
        }

        let controller = self
            .controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let controller = match controller {
            Some(handle) => handle.join().map_err(|_| EngineError::ControllerPanicked),
            None => Ok(()),
        };
        let workers = self.shared.scheduler.join();

        // Stale region groups must never reach the next start, even when a
        // join failed.
        self.discard_leftovers();
        controller?;
        workers?;

        info!("engine shutdown");
        Ok(())
    }

    fn discard_leftovers(&self) {
        let mut abandoned = 0;
        while self.shared.scheduler.take().is_some() {
            abandoned += 1;
        }
        if abandoned > 0 {
            debug!(groups = abandoned, "discarded unclaimed region groups");
        }
        self.shared.lock().regions.clear();
    }

    /// Pauses or resumes the simulation.
    ///
    /// Resuming with `start_next_frame` runs a frame (which keeps spawning
    /// frames until paused again). Otherwise only a pending buffer swap of
    /// an already retired frame is performed.
    pub fn toggle_pause(&self, paused: bool, start_next_frame: bool) {
        let mut state = self.shared.lock();
        state.paused = paused;
        if !paused && start_next_frame {
            self.shared.run_frame(&mut state);
        } else if state.previous_frame_complete {
            EngineShared::swap_buffers(&mut state);
        }
        self.shared.settled.notify_all();
    }

    /// Pauses the driver and runs exactly one frame.
    ///
    /// No-op if a frame is already in flight. The worker that retires the
    /// frame swaps the buffers before releasing the engine lock, so once
    /// [`EngineGuard::previous_frame_complete`] is true the guard reads the
    /// new generation.
    pub fn step(&self) -> Result<(), EngineError> {
        let mut state = self.shared.lock();
        if !state.started {
            return Err(EngineError::NotStarted);
        }
        state.paused = true;
        self.shared.run_frame(&mut state);
        Ok(())
    }

    /// Blocks until no frame is in flight and no swap is pending, or until
    /// `timeout` elapses. Returns true if the driver settled.
    ///
    /// While unpaused frames follow each other back to back, so this only
    /// returns true once the driver has been paused.
    pub fn wait_until_settled(&self, timeout: Duration) -> bool {
        let state = self.shared.lock();
        let (_state, result) = self
            .shared
            .settled
            .wait_timeout_while(state, timeout, |state| !state.is_settled())
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    /// Acquires the engine lock for reading or mutating cells.
    pub fn lock(&self) -> EngineGuard<'_> {
        EngineGuard {
            width: self.shared.width,
            height: self.shared.height,
            state: self.shared.lock(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.shared.lock().started
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    pub fn previous_frame_complete(&self) -> bool {
        self.shared.lock().previous_frame_complete
    }

    pub fn frames_completed(&self) -> u64 {
        self.shared.lock().frames_completed
    }

    pub fn num_workers(&self) -> usize {
        self.shared.scheduler.num_workers()
    }

    pub fn width(&self) -> usize {
        self.shared.width
    }

    pub fn height(&self) -> usize {
        self.shared.height
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.shared.scheduler
    }
}

impl Drop for FrameDriver {
    fn drop(&mut self) {
        if self.is_started()
            && let Err(e) = self.shutdown()
        {
            warn!("engine shutdown on drop failed: {e}");
        }
    }
}

fn run_controller(shared: &EngineShared, events: &Receiver<FrameEvent>) {
    while let Ok(event) = events.recv() {
        match event {
            FrameEvent::Retired => shared.handle_retired(),
            FrameEvent::Shutdown => break,
        }
    }
    debug!("frame controller stopped");
}

/// Exclusive access to the engine's grids and flags.
///
/// Coordinates are interior coordinates: `0..width` by `0..height`.
pub struct EngineGuard<'a> {
    width: usize,
    height: usize,
    state: MutexGuard<'a, EngineState>,
}

impl EngineGuard<'_> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_valid(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as u64) < self.width as u64 && (y as u64) < self.height as u64
    }

    fn padded(&self, x: i64, y: i64) -> Result<(usize, usize), EngineError> {
        if self.is_valid(x, y) {
            Ok((x as usize + 1, y as usize + 1))
        } else {
            Err(EngineError::InvalidCoordinate { x, y })
        }
    }

    /// Sets the age of a cell in both buffers.
    ///
    /// Fails on coordinates outside the grid. Silently does nothing while the
    /// driver is running or a frame is still in flight.
    pub fn set_cell(&mut self, x: i64, y: i64, age: u8) -> Result<(), EngineError> {
        let (px, py) = self.padded(x, y)?;
        if !self.state.paused || !self.state.previous_frame_complete {
            return Ok(());
        }
        self.state.front.set(px, py, age);
        self.state.back.set(px, py, age);
        Ok(())
    }

    /// Age of a cell in the readable (front) buffer.
    pub fn get_cell(&self, x: i64, y: i64) -> Result<u8, EngineError> {
        let (px, py) = self.padded(x, y)?;
        Ok(self.state.front.get(px, py))
    }

    /// Live cells in the readable buffer.
    pub fn population(&self) -> usize {
        self.state.front.population()
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    pub fn previous_frame_complete(&self) -> bool {
        self.state.previous_frame_complete
    }

    pub fn frames_completed(&self) -> u64 {
        self.state.frames_completed
    }
}
