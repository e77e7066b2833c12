//! wgpu binding layer for wrapworld.
//!
//! Mirrors the physical page arena in one storage buffer and turns render
//! list draws into indirect draw arguments.
//!
//! # Invariants
//! - The mirror is sized for the arena's page ceiling; offsets never move.
//! - Only the GPU-submission thread touches the device queue.

mod context;
mod draw;
mod error;
mod mirror;

pub use context::GpuContext;
pub use draw::{DrawArgs, IndirectDrawBackend};
pub use error::{GpuError, GpuResult};
pub use mirror::{GpuPageMirror, QueueSink, mirror_size};

pub fn crate_info() -> &'static str {
    "wrapworld-gpu v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("gpu"));
    }
}
