//! Error types for timer storage, lifecycle and execution.

use thiserror::Error;
use uuid::Uuid;

use lapse_core::{UnknownTimerKind, ValidationError};
use lapse_queue::JobError;

/// Errors from [`TimerStore`](crate::store::TimerStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The one-active-public-timer constraint rejected the write.
    #[error("topic {target_id} already has an active public timer")]
    DuplicatePublicTimer { target_id: Uuid },

    #[error("stored timer could not be decoded: {0}")]
    Decode(#[from] UnknownTimerKind),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors surfaced to callers of [`TimerLifecycle`](crate::TimerLifecycle).
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("validation failed on {field}: {0}", field = .0.field())]
    Validation(#[from] ValidationError),

    #[error("timer not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for TimerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicatePublicTimer { target_id } => {
                Self::Validation(ValidationError::DuplicatePublicTimer { target_id })
            }
            other => Self::Store(other),
        }
    }
}

impl TimerError {
    /// Map to an HTTP status code for API responses.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(v) => v.status_code(),
            Self::NotFound(_) => 404,
            Self::Store(_) => 500,
        }
    }

    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(v) => Some(v),
            _ => None,
        }
    }
}

/// Errors from [`TopicProvider`](crate::topics::TopicProvider) calls.
#[derive(Debug, Error)]
pub enum TopicError {
    #[error("topic not found: {0}")]
    NotFound(Uuid),

    /// A dependency could not be reached; the call may succeed later.
    #[error("topic provider unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for TopicError {
    fn from(e: sqlx::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

/// Failures while executing a due timer.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Transient dependency failure. The timer stays unprocessed.
    #[error("retryable: {0}")]
    Retryable(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("timer {id} cannot be executed: {reason}")]
    Invalid { id: Uuid, reason: String },
}

impl From<ExecutionError> for JobError {
    fn from(e: ExecutionError) -> Self {
        match e {
            ExecutionError::Retryable(_) | ExecutionError::Store(_) => JobError::Retryable(e.to_string()),
            ExecutionError::Payload(_) | ExecutionError::Invalid { .. } => JobError::Fatal(e.to_string()),
        }
    }
}
