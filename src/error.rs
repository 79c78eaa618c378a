//! Error taxonomy for the download core (spec.md §7).

/// Errors surfaced by the Moderator's public API and worker contracts.
#[derive(Debug, thiserror::Error, Clone, serde::Serialize)]
pub enum DownloadError {
    /// `cancel_task` called with an id the Task Manager doesn't know about.
    #[error("task not found: {0}")]
    TaskNotFound(u64),

    /// `set_max_workers` called with a negative value.
    #[error("argument error: {0}")]
    ArgumentError(String),

    /// Content-length probe failed during `init_task`. Recorded on the task
    /// as FAILED; never propagated to the caller of the public API.
    #[error("init error: {0}")]
    InitError(String),

    /// Chunk-level I/O or transport failure. Escalates to whole-task FAILED.
    #[error("chunk error: {0}")]
    ChunkError(String),

    /// Merge-level I/O failure. Task transitions to FAILED.
    #[error("merge error: {0}")]
    MergeError(String),

    /// Cooperative cancellation was observed. Never recorded as a failure;
    /// the task remains in its pre-interruption state so it can be resumed.
    #[error("interrupted")]
    Interrupted,
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        DownloadError::ChunkError(err.to_string())
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        DownloadError::ChunkError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for DownloadError {
    fn from(err: tokio::task::JoinError) -> Self {
        DownloadError::ChunkError(format!("worker task join failed: {err}"))
    }
}
