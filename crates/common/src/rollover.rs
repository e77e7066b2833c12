//! Toroidal ("rollover") distance math.
//!
//! The world wraps at `width` on every axis. A raw coordinate difference is
//! folded onto the shortest path around the torus before any norm is taken,
//! so objects on opposite sides of the seam are treated as neighbours.

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Units per map square in world space.
pub const MAP_SQUARE_SIZE: f64 = 65536.0;
/// Map squares per world edge.
pub const MAP_SQUARES_PER_WORLD: f64 = 256.0;
/// Map squares per relevance cell.
pub const MAP_SQUARES_PER_CELL: f64 = 8.0;

/// Signed shortest wrap-aware delta for a raw difference `v`.
///
/// Values already within half a width come back unchanged, including the
/// midpoint itself. Result lies in `[-width / 2, width / 2]` and
/// `delta_rollover(-v, w) == -delta_rollover(v, w)`.
pub fn delta_rollover(v: f64, width: f64) -> f64 {
    let half = width / 2.0;
    if (-half..=half).contains(&v) {
        return v;
    }
    let mut folded = v.abs() % width;
    if folded > half {
        folded -= width;
    }
    if v < 0.0 { -folded } else { folded }
}

/// Unsigned shortest wrap-aware distance on one axis, in `[0, width / 2]`.
pub fn rollover_distance(d: f64, width: f64) -> f64 {
    delta_rollover(d, width).abs()
}

/// How per-axis rollover deltas are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Norm {
    /// Sum of absolute deltas. Cheap; used for broad-phase checks.
    Taxicab,
    /// Straight-line distance; used for final checks.
    Euclidean,
}

/// Dimensions of the toroidal world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldGeometry {
    /// Edge length of one relevance cell, in world units.
    pub cell_size: f64,
    /// Cells per world edge. The world wraps after this many cells.
    pub world_width_cells: u32,
}

impl Default for WorldGeometry {
    fn default() -> Self {
        Self {
            cell_size: MAP_SQUARE_SIZE * MAP_SQUARES_PER_CELL,
            world_width_cells: (MAP_SQUARES_PER_WORLD / MAP_SQUARES_PER_CELL) as u32,
        }
    }
}

impl WorldGeometry {
    pub fn new(cell_size: f64, world_width_cells: u32) -> Self {
        Self {
            cell_size,
            world_width_cells,
        }
    }

    /// World edge length in world units.
    pub fn width(&self) -> f64 {
        self.cell_size * self.world_width_cells as f64
    }

    /// World edge length in cells.
    pub fn width_cells(&self) -> f64 {
        self.world_width_cells as f64
    }

    /// Per-axis shortest wrap-aware vector from `b` to `a`.
    pub fn rollover_delta(&self, a: DVec3, b: DVec3) -> DVec3 {
        let w = self.width();
        DVec3::new(
            delta_rollover(a.x - b.x, w),
            delta_rollover(a.y - b.y, w),
            delta_rollover(a.z - b.z, w),
        )
    }

    /// Wrap-aware distance between two world positions under `norm`.
    pub fn distance(&self, a: DVec3, b: DVec3, norm: Norm) -> f64 {
        let d = self.rollover_delta(a, b);
        match norm {
            Norm::Taxicab => d.x.abs() + d.y.abs() + d.z.abs(),
            Norm::Euclidean => d.length(),
        }
    }

    pub fn euclidean_distance(&self, a: DVec3, b: DVec3) -> f64 {
        self.distance(a, b, Norm::Euclidean)
    }

    /// Taxicab distance on the ground plane, ignoring altitude.
    pub fn taxicab_distance_xz(&self, a: DVec3, b: DVec3) -> f64 {
        let w = self.width();
        rollover_distance(a.x - b.x, w) + rollover_distance(a.z - b.z, w)
    }
}
