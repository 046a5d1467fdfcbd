//! Initial grid states.
//!
//! A [`Preset`] writes a starting pattern through an [`EngineGuard`], so it
//! only has an effect while the driver is paused between frames. A [`World`]
//! pairs a preset with a display name.

use crate::error::EngineError;
use crate::frame_driver::{EngineGuard, FrameDriver};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

/// Writes an initial state into the engine.
pub trait Preset {
    fn name(&self) -> &str;

    /// Applies the pattern. The guard already holds the engine lock.
    fn apply(&self, engine: &mut EngineGuard<'_>) -> Result<(), EngineError>;
}

/// Sets a live cell, ignoring coordinates that fall outside the grid.
fn set_alive_clipped(engine: &mut EngineGuard<'_>, x: i64, y: i64) -> Result<(), EngineError> {
    if engine.is_valid(x, y) {
        engine.set_cell(x, y, 1)?;
    }
    Ok(())
}

/// Kills every cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlankGrid;

impl Preset for BlankGrid {
    fn name(&self) -> &str {
        "blank"
    }

    fn apply(&self, engine: &mut EngineGuard<'_>) -> Result<(), EngineError> {
        for y in 0..engine.height() as i64 {
            for x in 0..engine.width() as i64 {
                engine.set_cell(x, y, 0)?;
            }
        }
        Ok(())
    }
}

/// Every cell alive except the outermost ring.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullGrid;

impl Preset for FullGrid {
    fn name(&self) -> &str {
        "full"
    }

    fn apply(&self, engine: &mut EngineGuard<'_>) -> Result<(), EngineError> {
        let width = engine.width() as i64;
        let height = engine.height() as i64;
        for y in 0..height {
            for x in 0..width {
                let inner = x > 0 && x < width - 1 && y > 0 && y < height - 1;
                engine.set_cell(x, y, u8::from(inner))?;
            }
        }
        Ok(())
    }
}

/// Roughly half of the cells alive.
///
/// With a seed the pattern is reproducible; without one it is drawn from
/// the operating system's entropy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomGrid {
    pub seed: Option<u64>,
}

impl RandomGrid {
    pub fn seeded(seed: u64) -> Self {
        RandomGrid { seed: Some(seed) }
    }
}

impl Preset for RandomGrid {
    fn name(&self) -> &str {
        "random"
    }

    fn apply(&self, engine: &mut EngineGuard<'_>) -> Result<(), EngineError> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        for y in 0..engine.height() as i64 {
            for x in 0..engine.width() as i64 {
                let alive = rng.random_range(0..100) > 50;
                engine.set_cell(x, y, u8::from(alive))?;
            }
        }
        Ok(())
    }
}

/// Rows of eight-cell blocks, each row shifted one column left of the one above.
#[derive(Debug, Clone, Copy, Default)]
pub struct DancingBorder;

impl DancingBorder {
    const BLOCK_LEN: usize = 8;
    const BLOCK_GAP: i64 = 2;

    fn draw_row(engine: &mut EngineGuard<'_>, start_x: i64, y: i64) -> Result<(), EngineError> {
        let width = engine.width() as i64;
        let mut in_block = 0;
        let mut x = start_x;
        while x < width {
            in_block += 1;
            if in_block >= Self::BLOCK_LEN {
                x += Self::BLOCK_GAP;
                in_block = 0;
            }
            set_alive_clipped(engine, x, y)?;
            x += 1;
        }
        Ok(())
    }
}

impl Preset for DancingBorder {
    fn name(&self) -> &str {
        "dancing-border"
    }

    fn apply(&self, engine: &mut EngineGuard<'_>) -> Result<(), EngineError> {
        BlankGrid.apply(engine)?;
        for y in 0..engine.height() as i64 {
            Self::draw_row(engine, -y, y)?;
        }
        Ok(())
    }
}

/// Anti-diagonal stripes in blocks of eight, leaving the lower-left triangle empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpperRightCheckered;

impl UpperRightCheckered {
    const BLOCK_LEN: usize = 8;

    fn draw_diagonal(engine: &mut EngineGuard<'_>, start: i64) -> Result<(), EngineError> {
        let width = engine.width() as i64;
        let (mut x, mut y) = (start, start);
        while x < width && y >= 0 {
            set_alive_clipped(engine, x, y)?;
            x += 1;
            y -= 1;
        }
        Ok(())
    }
}

impl Preset for UpperRightCheckered {
    fn name(&self) -> &str {
        "upper-right-checkered"
    }

    fn apply(&self, engine: &mut EngineGuard<'_>) -> Result<(), EngineError> {
        BlankGrid.apply(engine)?;
        let width = engine.width() as i64;
        let mut diagonal = 0;
        let mut in_block = 0;
        while diagonal < width {
            in_block += 1;
            Self::draw_diagonal(engine, diagonal)?;
            diagonal += 1;
            if in_block >= Self::BLOCK_LEN {
                in_block = 0;
                diagonal += 1;
            }
        }
        Ok(())
    }
}

/// Diagonal fleets of gliders heading towards the lower right.
#[derive(Debug, Clone, Copy, Default)]
pub struct GliderGun;

impl GliderGun {
    const SPACING: i64 = 5;

    fn spawn_fleet(engine: &mut EngineGuard<'_>, mut x: i64, mut y: i64) -> Result<(), EngineError> {
        while x >= Self::SPACING && y >= Self::SPACING {
            set_alive_clipped(engine, x, y)?;
            set_alive_clipped(engine, x + 1, y + 1)?;
            for gx in x - 1..=x + 1 {
                set_alive_clipped(engine, gx, y + 2)?;
            }
            x -= Self::SPACING;
            y -= Self::SPACING;
        }
        Ok(())
    }
}

impl Preset for GliderGun {
    fn name(&self) -> &str {
        "glider-gun"
    }

    fn apply(&self, engine: &mut EngineGuard<'_>) -> Result<(), EngineError> {
        BlankGrid.apply(engine)?;
        let height = engine.height() as i64;
        let mut x = engine.width() as i64 - 3;
        let mut y = 0;
        while x >= Self::SPACING && y < height - Self::SPACING {
            Self::spawn_fleet(engine, x, y)?;
            x -= Self::SPACING;
            y += Self::SPACING;
        }
        Ok(())
    }
}

/// Names accepted by [`preset_by_name`].
pub const PRESET_NAMES: &[&str] = &[
    "random",
    "blank",
    "full",
    "dancing-border",
    "upper-right-checkered",
    "glider-gun",
];

/// Looks up a preset by name, ignoring case and treating `_` and spaces as `-`.
///
/// `seed` only affects `random`.
pub fn preset_by_name(name: &str, seed: Option<u64>) -> Option<Box<dyn Preset>> {
    let normalized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '_' | ' ' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect();

    let preset: Box<dyn Preset> = match normalized.as_str() {
        "random" => Box::new(RandomGrid { seed }),
        "blank" => Box::new(BlankGrid),
        "full" => Box::new(FullGrid),
        "dancing-border" => Box::new(DancingBorder),
        "upper-right-checkered" => Box::new(UpperRightCheckered),
        "glider-gun" => Box::new(GliderGun),
        _ => return None,
    };
    Some(preset)
}

/// A named starting state.
pub struct World {
    name: String,
    preset: Box<dyn Preset>,
}

impl World {
    pub fn new(name: impl Into<String>, preset: Box<dyn Preset>) -> Self {
        World {
            name: name.into(),
            preset,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Locks the engine and applies the preset.
    ///
    /// Pause the driver first: cell writes are ignored while frames run.
    pub fn init_engine(&self, driver: &FrameDriver) -> Result<(), EngineError> {
        let mut engine = driver.lock();
        self.preset.apply(&mut engine)
    }
}

impl fmt::Display for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
