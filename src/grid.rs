//! Cell storage for the frame driver.
//!
//! A [`Grid`] holds `width x height` interior cells surrounded by a one-cell
//! dead border, so neighbour lookups never need bounds checks. Cells are
//! atomics: during a frame every region job reads the whole front grid while
//! writing its own disjoint columns of the back grid. Relaxed accesses are
//! enough because the frame barrier (engine mutex plus controller handoff)
//! orders one frame's writes before the next frame's reads.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Padded 2D array of cell ages. Age 0 is a dead cell.
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<AtomicU8>,
}

impl Grid {
    /// Creates an all-dead grid with `width x height` interior cells.
    pub fn new(width: usize, height: usize) -> Self {
        let len = (width + 2) * (height + 2);
        let mut cells = Vec::with_capacity(len);
        cells.resize_with(len, || AtomicU8::new(0));
        Grid {
            width,
            height,
            cells,
        }
    }

    /// Interior width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Interior height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Padded width (interior plus border).
    pub fn stride(&self) -> usize {
        self.width + 2
    }

    #[inline]
    fn index(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.width + 2 && y < self.height + 2);
        y * self.stride() + x
    }

    /// Reads a cell by padded coordinates (`1..=width`, `1..=height` are interior).
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.cells[self.index(x, y)].load(Ordering::Relaxed)
    }

    /// Writes a cell by padded coordinates.
    #[inline]
    pub fn set(&self, x: usize, y: usize, age: u8) {
        self.cells[self.index(x, y)].store(age, Ordering::Relaxed);
    }

    /// Number of live cells in the 8-neighbourhood of a padded interior coordinate.
    #[inline]
    pub fn live_neighbours(&self, x: usize, y: usize) -> u8 {
        let mut alive = 0;
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                if (nx != x || ny != y) && self.get(nx, ny) > 0 {
                    alive += 1;
                }
            }
        }
        alive
    }

    /// Copies every cell of `other`, which must have the same dimensions.
    pub fn copy_from(&self, other: &Grid) {
        assert_eq!(
            (self.width, self.height),
            (other.width, other.height),
            "grid dimensions differ"
        );
        for (dst, src) in self.cells.iter().zip(&other.cells) {
            dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    /// Kills every cell.
    pub fn clear(&self) {
        for cell in &self.cells {
            cell.store(0, Ordering::Relaxed);
        }
    }

    /// Number of live cells.
    pub fn population(&self) -> usize {
        self.cells
            .iter()
            .filter(|cell| cell.load(Ordering::Relaxed) > 0)
            .count()
    }
}

impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grid")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("population", &self.population())
            .finish()
    }
}
