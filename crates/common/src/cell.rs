use glam::DVec3;
use serde::{Deserialize, Serialize};

/// A 3D cell coordinate in the toroidal world grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Marker cell for objects with no spatial locality (sky, global effects).
/// Always passes the relevance test.
pub const VISIBLE_EVERYWHERE: CellCoord = CellCoord {
    x: i32::MIN,
    y: i32::MIN,
    z: i32::MIN,
};

impl CellCoord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Cell containing `pos`: each axis is `pos / cell_size` rounded to the
    /// nearest integer, ties to even. Axes saturate one above `i32::MIN`,
    /// so no position maps onto [`VISIBLE_EVERYWHERE`].
    pub fn from_position(pos: DVec3, cell_size: f64) -> Self {
        let floor = f64::from(i32::MIN + 1);
        let axis = |v: f64| (v / cell_size).round_ties_even().max(floor) as i32;
        Self {
            x: axis(pos.x),
            y: axis(pos.y),
            z: axis(pos.z),
        }
    }

    pub fn is_visible_everywhere(&self) -> bool {
        *self == VISIBLE_EVERYWHERE
    }
}
