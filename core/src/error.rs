use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong while building the index inputs.
///
/// Only `InputNotFound`, `WorkerInit`/`NoReadyWorkers`, `Interrupted` and
/// `Critical` end a run. The rest are contained by the unit that raised them.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("input not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("failed to process {id} ({title}): {reason}")]
    Transform { id: u64, title: String, reason: String },

    #[error("worker {worker} failed to initialize: {reason}")]
    WorkerInit { worker: usize, reason: String },

    #[error("no worker in the pool became ready")]
    NoReadyWorkers,

    #[error("interrupted")]
    Interrupted,

    #[error("critical error: {0}")]
    Critical(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
