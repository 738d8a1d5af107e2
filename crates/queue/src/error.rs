//! Job queue error types.

use thiserror::Error;

/// Failure talking to the job queue itself (schedule / cancel).
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Outcome reported by a [`JobHandler`](crate::JobHandler) for a failed delivery.
#[derive(Debug, Error)]
pub enum JobError {
    /// A dependency was unavailable; deliver the job again later.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Retrying cannot help; drop the job.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}
