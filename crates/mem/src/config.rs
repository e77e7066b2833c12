use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bytes per vec4 in GPU memory.
pub const BYTES_PER_VEC4: usize = 16;
/// Triangle vertices per GPU block; one page holds one block of vec4s.
pub const GPU_VERTICES_PER_BLOCK: usize = 96;
/// Default page size, anchored to one block of vertices.
pub const PAGE_SIZE_BYTES: usize = BYTES_PER_VEC4 * GPU_VERTICES_PER_BLOCK;

/// Sizing and timing for the paged memory arena and its windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Bytes per physical page.
    pub page_size_bytes: usize,
    /// Hard ceiling on physical pages. Exceeding it is fatal.
    pub max_pages: usize,
    /// Coalescing delay for frees that join an already-pending batch.
    pub min_free_delay_ms: u64,
    /// Coalescing delay for a free that starts a new batch.
    pub max_free_delay_ms: u64,
    /// Records reserved by a window before its first growth.
    pub initial_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            page_size_bytes: PAGE_SIZE_BYTES,
            max_pages: 16 * 1024,
            min_free_delay_ms: 100,
            max_free_delay_ms: 500,
            initial_capacity: 1,
        }
    }
}

impl MemoryConfig {
    pub fn min_free_delay(&self) -> Duration {
        Duration::from_millis(self.min_free_delay_ms)
    }

    pub fn max_free_delay(&self) -> Duration {
        Duration::from_millis(self.max_free_delay_ms)
    }

    /// Total size of the physical arena in bytes.
    pub fn arena_bytes(&self) -> usize {
        self.page_size_bytes * self.max_pages
    }
}
