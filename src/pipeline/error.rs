//! Pipeline-specific error types.

use thiserror::Error;

/// Errors that can occur within the pipeline system.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Borrowed frame cannot be mutated in place; materialize an owned copy first")]
    BorrowedMutation,

    #[error("Frame layout mismatch: expected {expected} samples, got {actual}")]
    LayoutMismatch { expected: usize, actual: usize },

    #[error("Pipeline already running")]
    AlreadyRunning,

    #[error("Pipeline has no stages")]
    EmptyPipeline,

    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    #[error("Stage '{0}' was lost when its worker panicked")]
    StageLost(String),

    #[error("Source error: {0}")]
    Source(String),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
