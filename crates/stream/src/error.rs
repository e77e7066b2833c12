/// Errors from grids, cameras and the relevance executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("relevance executor has stopped")]
    ExecutorStopped,
    #[error("failed to start relevance executor: {0}")]
    ExecutorSpawn(String),
}

pub type StreamResult<T> = Result<T, StreamError>;
