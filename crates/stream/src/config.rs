use serde::{Deserialize, Serialize};
use wrapworld_common::WorldGeometry;
use wrapworld_common::rollover::MAP_SQUARES_PER_CELL;

/// Visibility diameter around the observer, in map squares.
pub const VISIBILITY_DIAMETER_MAP_SQUARES: f64 = 27.0;

/// Relevance tuning for cameras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    pub geometry: WorldGeometry,
    /// A cell is relevant while its ground-plane rollover distance from the
    /// camera's cell is strictly below this many cells.
    pub relevance_radius_cells: f64,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            geometry: WorldGeometry::default(),
            relevance_radius_cells: VISIBILITY_DIAMETER_MAP_SQUARES / MAP_SQUARES_PER_CELL,
        }
    }
}

impl RelevanceConfig {
    /// Relevance radius expressed in world units.
    pub fn relevance_radius_world(&self) -> f64 {
        self.relevance_radius_cells * self.geometry.cell_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RelevanceConfig::default();
        assert_eq!(config.relevance_radius_cells, 3.375);
        assert_eq!(config.geometry.world_width_cells, 32);
        assert_eq!(config.relevance_radius_world(), 27.0 * 65536.0);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: RelevanceConfig = serde_json::from_str(r#"{"relevance_radius_cells": 5.0}"#).unwrap();
        assert_eq!(config.relevance_radius_cells, 5.0);
        assert_eq!(config.geometry, WorldGeometry::default());
    }
}
