//! Streaming relevance: which parts of the toroidal world matter to a camera.
//!
//! Grids bucket renderables by cell. Each camera owns a relevance graph of
//! `(grid, cell)` pairs that lives on the single relevance executor thread,
//! and publishes a flat set of relevant renderables for render-list workers.
//!
//! # Invariants
//! - Only the relevance executor mutates or re-evaluates a relevance graph.
//! - Commands are applied in submission order.
//! - The visible-everywhere cell is relevant to every camera.
//! - A malformed radius makes cells irrelevant; it never fails.

mod camera;
mod config;
mod error;
mod executor;
mod grid;
mod relevance;

pub use camera::Camera;
pub use config::{RelevanceConfig, VISIBILITY_DIAMETER_MAP_SQUARES};
pub use error::{StreamError, StreamResult};
pub use executor::{CameraId, RelevanceExecutor, RelevanceHandle};
pub use grid::{GridId, SpacePartitioningGrid};
pub use relevance::{RelevanceGraph, RelevantEntry, RelevantSet, cell_is_relevant};

pub fn crate_info() -> &'static str {
    "wrapworld-stream v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("stream"));
    }
}
