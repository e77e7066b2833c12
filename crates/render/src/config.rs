use serde::{Deserialize, Serialize};
use wrapworld_common::rollover::MAP_SQUARE_SIZE;
use wrapworld_stream::VISIBILITY_DIAMETER_MAP_SQUARES;

/// Render pipeline tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Objects farther than this from the observer (world units, wrapped)
    /// are left out of the render list.
    pub visibility_radius: f64,
    /// Threads in the rebuild pool.
    pub worker_threads: usize,
    /// Ids one render list can send to the GPU; nearer objects win.
    pub object_list_capacity: usize,
    /// Frames between FPS reports.
    pub report_interval: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            visibility_radius: MAP_SQUARE_SIZE * VISIBILITY_DIAMETER_MAP_SQUARES / 2.0,
            worker_threads: 2,
            object_list_capacity: 1024,
            report_interval: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RenderConfig::default();
        assert_eq!(config.visibility_radius, 13.5 * 65536.0);
        assert_eq!(config.report_interval, 20);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: RenderConfig = serde_json::from_str(r#"{"worker_threads": 4}"#).unwrap();
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.object_list_capacity, 1024);
    }
}
