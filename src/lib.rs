//! # lockstep - Priority Job Scheduler with a Barrier-Synchronized Frame Driver
//!
//! A fixed pool of worker threads fed through a two-stage queue, plus a
//! double-buffered simulation driver built on top of it.
//!
//! ## Architecture
//!
//! - **Jobs**: units of work shared as `Arc<dyn Job>` so the same object can be
//!   resubmitted every frame
//! - **Scheduler**: buffers submitted jobs per priority in size-balanced
//!   batches, and publishes them as immutable groups on `dispatch`
//! - **Workers**: OS threads that claim one group at a time, highest priority
//!   first
//! - **Frame driver**: splits each simulation step into one region job per
//!   worker, waits for all of them, swaps buffers and starts the next step
//!
//! ## Example
//!
//! ```no_run
//! use lockstep::{Counter, FnJob, Scheduler};
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::new(4);
//! scheduler.start().unwrap();
//!
//! let counter = Counter::new(100);
//! let jobs = (0..100i32).map(|i| {
//!     FnJob::with_counter(move |worker| println!("job {i} on worker {worker}"), counter.clone())
//!         .with_priority(i % 3)
//!         .into_ref()
//! });
//! scheduler.submit_all(jobs).unwrap();
//! scheduler.dispatch().unwrap();
//!
//! assert!(counter.wait(Duration::from_secs(1)));
//! scheduler.stop(true).unwrap();
//! scheduler.join().unwrap();
//! ```

pub mod config;
pub mod counter;
pub mod error;
pub mod frame_driver;
pub mod grid;
pub mod job;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod preset;
pub mod ready_queue;
pub mod region;
pub mod scheduler;
pub mod worker;

pub use config::{LockstepConfig, SimulationConfig};
pub use counter::Counter;
pub use error::{ConfigError, EngineError, SchedulerError};
pub use frame_driver::{EngineConfig, EngineGuard, FrameDriver};
pub use job::{FnJob, Job, JobGroup, JobRef, Priority};
#[cfg(feature = "metrics")]
pub use metrics::{Metrics, MetricsSnapshot};
pub use preset::{Preset, World, preset_by_name};
pub use region::{LifeRule, Region, RegionJob, UpdateRule};
pub use scheduler::{Scheduler, SchedulerConfig};
