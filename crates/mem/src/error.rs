/// Errors from the paged memory subsystem.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemError {
    /// The shared physical arena has no page left to hand out. GPU-resident
    /// capacity is fixed at startup, so callers treat this as fatal.
    #[error("page arena exhausted: {requested} pages requested, ceiling is {max_pages}")]
    ArenaExhausted { requested: usize, max_pages: usize },
    #[error("schema has no fields")]
    EmptySchema,
    #[error("page size must be non-zero")]
    ZeroPageSize,
    #[error("failed to start freeing service: {0}")]
    ServiceSpawn(String),
}

/// Failure reported by a [`PageSink`](crate::PageSink) upload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("upload of physical page {page} failed: {reason}")]
pub struct UploadError {
    pub page: usize,
    pub reason: String,
}

pub type MemResult<T> = Result<T, MemError>;
