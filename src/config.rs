//! TOML configuration for the `lockstep` runner.
//!
//! Every field is optional:
//!
//! ```toml
//! [engine]
//! width = 512
//! height = 256
//! max_age = 10
//!
//! [engine.scheduler]
//! num_workers = 8
//! max_jobs_per_group = 100
//! idle_sleep_us = 1000
//! pin_workers = false
//!
//! [simulation]
//! preset = "glider-gun"
//! generations = 1000
//! seed = 42
//! ```

use crate::error::ConfigError;
use crate::frame_driver::EngineConfig;
use crate::preset::{PRESET_NAMES, preset_by_name};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What the runner does once the engine is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Starting pattern, see [`PRESET_NAMES`]. Default: `random`.
    pub preset: String,
    /// Generations to run. Default: 100.
    pub generations: u64,
    /// Seed for the `random` preset.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            preset: "random".to_string(),
            generations: 100,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockstepConfig {
    pub engine: EngineConfig,
    pub simulation: SimulationConfig,
}

impl LockstepConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Rejects values the engine cannot run with.
    ///
    /// Out-of-range worker counts are not an error: the scheduler clamps them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.width == 0 || self.engine.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "grid must be at least 1x1, got {}x{}",
                self.engine.width, self.engine.height
            )));
        }
        if self.engine.max_age == 0 {
            return Err(ConfigError::Invalid("max_age must be at least 1".to_string()));
        }
        if preset_by_name(&self.simulation.preset, None).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown preset '{}', expected one of: {}",
                self.simulation.preset,
                PRESET_NAMES.join(", ")
            )));
        }
        Ok(())
    }
}
