//! Render lists for wrapworld: what each camera draws and when.
//!
//! A [`RenderPipeline`] owns a [`RenderListPair`]. Workers rebuild the back
//! list from a camera's relevant set while the GPU-submission thread keeps
//! drawing the front list; a finished back list is swapped in at the start
//! of the next frame.
//!
//! # Invariants
//! - Exactly two render lists exist per pipeline.
//! - At most one rebuild is in flight; further requests are ignored.
//! - A swap never blocks and never exposes a half-built list.
//! - Only the GPU-submission thread sends, flushes or draws.

mod backend;
mod config;
mod error;
mod list;
mod pair;
mod pipeline;
mod timer;

pub use backend::{DrawCall, GpuBackend, RecordingBackend};
pub use config::RenderConfig;
pub use error::{RenderError, RenderResult};
pub use list::{RenderList, VisibleEntry};
pub use pair::{BuildState, RenderListPair};
pub use pipeline::{FrameStats, RenderPipeline};
pub use timer::FrameTimer;

pub fn crate_info() -> &'static str {
    "wrapworld-render v0.1.0"
}
