//! Shared types for the wrapworld engine: renderable identity, cell coordinates
//! and the toroidal rollover math used by collision and relevance code.
//!
//! # Invariants
//! - Every wrap-aware distance on one axis lies in `[0, width / 2]`.
//! - Signed rollover deltas are antisymmetric and lie in `[-width / 2, width / 2]`.

mod cell;
pub mod rollover;
mod types;

pub use cell::{CellCoord, VISIBLE_EVERYWHERE};
pub use rollover::{Norm, WorldGeometry};
pub use types::{Marker, Renderable, RenderableId};

pub fn crate_info() -> &'static str {
    "wrapworld-common v0.1.0"
}
