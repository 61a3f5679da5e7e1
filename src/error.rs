use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Too many running jobs: {running} already in flight")]
    Busy { running: usize },
    #[error("Job not found: {0}")]
    JobNotFound(String),
    #[error("Content producer failed: {0}")]
    Producer(#[from] ProducerError),
    #[error("Store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("Job exceeded its maximum duration of {0:?}")]
    TimedOut(Duration),
}

/// Failures of the external generation capability.
///
/// Malformed output is not represented here, the adapters repair it locally.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("generation service unreachable: {0}")]
    Unreachable(String),
    #[error("generation service returned an empty response")]
    EmptyResponse,
    #[error("generation request timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
