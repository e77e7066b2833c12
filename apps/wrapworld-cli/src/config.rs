use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use wrapworld_mem::MemoryConfig;
use wrapworld_render::RenderConfig;
use wrapworld_stream::RelevanceConfig;

/// Every tunable of the engine, as read from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub memory: MemoryConfig,
    pub relevance: RelevanceConfig,
    pub render: RenderConfig,
}

impl EngineConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Defaults, or the file at `path` when given.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_are_optional() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"memory": {"max_pages": 64}, "render": {"worker_threads": 1}}"#).unwrap();
        assert_eq!(config.memory.max_pages, 64);
        assert_eq!(config.memory.page_size_bytes, 1536);
        assert_eq!(config.render.worker_threads, 1);
        assert_eq!(config.relevance, RelevanceConfig::default());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = EngineConfig::load(Path::new("/nonexistent/wrapworld.json")).unwrap_err();
        assert!(err.to_string().contains("reading"));
    }

    #[test]
    fn round_trips_through_json() {
        let config = EngineConfig::default();
        let text = serde_json::to_string_pretty(&config).unwrap();
        assert_eq!(serde_json::from_str::<EngineConfig>(&text).unwrap(), config);
    }
}
