//! Region jobs: one rectangular slice of a frame update.
//!
//! A frame is split into exactly one [`Region`] per worker. Each
//! [`RegionJob`] reads only the front grid, writes only its own slice of the
//! back grid and reports back to its [`CompletionHook`] exactly once per
//! execution.

use crate::grid::Grid;
use crate::job::Job;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Default age cap for [`LifeRule`].
pub const DEFAULT_MAX_AGE: u8 = 10;

/// Half-open rectangle in padded grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x_start: usize,
    pub x_end: usize,
    pub y_start: usize,
    pub y_end: usize,
}

impl Region {
    /// Splits a `width x height` interior into `count` column slices.
    ///
    /// Every slice is `width / count` columns wide except the last, which
    /// also takes the remainder so no column is left unassigned.
    pub fn partition(width: usize, height: usize, count: usize) -> Vec<Region> {
        let count = count.max(1);
        let x_offset = width / count;

        (0..count)
            .map(|i| {
                let x_start = i * x_offset + 1;
                let x_end = if i + 1 == count {
                    width + 1
                } else {
                    x_start + x_offset
                };
                Region {
                    x_start,
                    x_end,
                    y_start: 1,
                    y_end: height + 1,
                }
            })
            .collect()
    }

    pub fn cell_count(&self) -> usize {
        (self.x_end - self.x_start) * (self.y_end - self.y_start)
    }
}

/// Per-cell transition function of the simulation.
pub trait UpdateRule: Send + Sync {
    /// Next age of a cell given its current age and live neighbour count.
    fn next(&self, current: u8, live_neighbours: u8) -> u8;
}

/// Conway's rules with cell ageing.
///
/// A live cell with two or three live neighbours survives and ages by one
/// generation (capped at `max_age`); a dead cell with exactly three is born
/// with age 1; everything else dies.
///
/// Ageing reads only the front grid, so a cell alive for `n` generations has
/// age `n + 1`, not the back buffer's age from two generations ago.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifeRule {
    pub max_age: u8,
}

impl Default for LifeRule {
    fn default() -> Self {
        LifeRule {
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

impl UpdateRule for LifeRule {
    fn next(&self, current: u8, live_neighbours: u8) -> u8 {
        match (current, live_neighbours) {
            (age, 2 | 3) if age > 0 => age.saturating_add(1).min(self.max_age.max(1)),
            (0, 3) => 1,
            _ => 0,
        }
    }
}

/// Receives a region job's completion signal.
pub trait CompletionHook: Send + Sync {
    /// Called once per execution, after all of the job's writes.
    fn job_completed(&self, worker_id: usize);
}

#[derive(Clone)]
struct FrameBuffers {
    front: Arc<Grid>,
    back: Arc<Grid>,
}

/// Job that advances one region of the grid by one generation.
pub struct RegionJob {
    region: Region,
    rule: Arc<dyn UpdateRule>,
    frame: Mutex<Option<FrameBuffers>>,
    hook: Weak<dyn CompletionHook>,
}

impl RegionJob {
    pub fn new(region: Region, rule: Arc<dyn UpdateRule>, hook: Weak<dyn CompletionHook>) -> Self {
        RegionJob {
            region,
            rule,
            frame: Mutex::new(None),
            hook,
        }
    }

    /// Binds the grids for the next execution: read `front`, write `back`.
    pub fn bind(&self, front: Arc<Grid>, back: Arc<Grid>) {
        *self.frame.lock().unwrap_or_else(PoisonError::into_inner) = Some(FrameBuffers { front, back });
    }

    fn update(&self, front: &Grid, back: &Grid) {
        let r = self.region;
        for y in r.y_start..r.y_end {
            for x in r.x_start..r.x_end {
                let next = self.rule.next(front.get(x, y), front.live_neighbours(x, y));
                back.set(x, y, next);
            }
        }
    }
}

impl Job for RegionJob {
    fn execute(&self, worker_id: usize) {
        let _completion = CompletionGuard {
            hook: &self.hook,
            worker_id,
        };

        let frame = self
            .frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(frame) = frame {
            self.update(&frame.front, &frame.back);
        }
    }
}

/// Fires the completion hook on drop, so a panicking update still releases the barrier.
struct CompletionGuard<'a> {
    hook: &'a Weak<dyn CompletionHook>,
    worker_id: usize,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.upgrade() {
            hook.job_completed(self.worker_id);
        }
    }
}
