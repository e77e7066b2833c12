use wrapworld_mem::MemError;

/// Errors from render-list setup and draw submission.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Memory(#[from] MemError),
    #[error("failed to build render worker pool: {0}")]
    WorkerPool(String),
    #[error("backend rejected draw: {0}")]
    Backend(String),
}

pub type RenderResult<T> = Result<T, RenderError>;
