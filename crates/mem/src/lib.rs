//! Paged GPU memory for wrapworld.
//!
//! One [`PageArena`] owns the physical page space that mirrors GPU memory.
//! [`PagedByteBuffer`]s stitch logical byte ranges out of its pages, and
//! [`MemoryWindow`]s lay fixed-size typed records over a buffer. Deferred
//! frees from every window are batched by a single [`FreeingService`].
//!
//! # Invariants
//! - An index handed out by an [`IndexPool`] is unique among outstanding
//!   indices until it is freed.
//! - Every page-table entry of a live buffer names a physical page owned by
//!   that buffer alone.
//! - A flush uploads exactly the pages written since the previous flush.
//! - Slot-pool growth and buffer growth of a window happen as one step under
//!   the arena's growth lock.

mod arena;
mod config;
mod error;
mod freeing;
mod index_pool;
mod paged;
mod schema;
mod tables;
mod window;

pub use arena::{FlushReport, PageArena, PageSink};
pub use config::{BYTES_PER_VEC4, GPU_VERTICES_PER_BLOCK, MemoryConfig, PAGE_SIZE_BYTES};
pub use error::{MemError, MemResult, UploadError};
pub use freeing::{FreeingHandle, FreeingService, FreeingStats};
pub use index_pool::{GrowthFn, IndexPool};
pub use paged::PagedByteBuffer;
pub use schema::{ElementType, Field, FieldKind, Schema, SchemaBuilder};
pub use tables::{MatrixTable, ObjectListTable};
pub use window::{Element, MemoryWindow, PageMapEntry, Variable};

pub fn crate_info() -> &'static str {
    "wrapworld-mem v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("mem"));
    }
}
