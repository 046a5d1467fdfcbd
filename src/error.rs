//! Error types for the scheduler, the frame driver and configuration loading.

use thiserror::Error;

/// Lifecycle violations reported by the [`Scheduler`](crate::Scheduler).
///
/// These are caller contract violations: the failing call has no effect on
/// scheduler state and is never retried internally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler was already started")]
    AlreadyStarted,

    #[error("scheduler is not running")]
    NotStarted,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error("{0} worker thread(s) panicked")]
    WorkersPanicked(usize),
}

/// Errors reported by the [`FrameDriver`](crate::FrameDriver) and its lock guard.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine was already started")]
    AlreadyStarted,

    #[error("engine is not running")]
    NotStarted,

    #[error("invalid cell coordinates ({x}, {y})")]
    InvalidCoordinate { x: i64, y: i64 },

    #[error("failed to spawn frame controller: {0}")]
    ControllerSpawn(String),

    #[error("frame controller thread panicked")]
    ControllerPanicked,

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Errors raised while loading a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
