use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// An invariant violated by a timer create or update. Raised before any
/// write or scheduling side effect happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("execute_at ({execute_at}) must not be before created_at ({created_at})")]
    ExecuteAtBeforeCreation {
        execute_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    },

    #[error("topic {target_id} already has an active public timer")]
    DuplicatePublicTimer { target_id: Uuid },

    #[error("timer {id} has been deleted and can no longer be changed")]
    Deleted { id: Uuid },

    #[error("timer {id} has already been processed and can no longer be changed")]
    Processed { id: Uuid },
}

impl ValidationError {
    /// The timer field the failure is attributed to.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Missing { field } => *field,
            Self::ExecuteAtBeforeCreation { .. } => "execute_at",
            Self::DuplicatePublicTimer { .. } => "target_id",
            Self::Deleted { .. } => "deleted_at",
            Self::Processed { .. } => "processed_at",
        }
    }

    /// Map to an HTTP status code for API responses.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::DuplicatePublicTimer { .. } => 409,
            Self::Deleted { .. } | Self::Processed { .. } => 409,
            Self::Missing { .. } | Self::ExecuteAtBeforeCreation { .. } => 422,
        }
    }
}

/// A stored kind name that does not belong to the known set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown timer kind: {0}")]
pub struct UnknownTimerKind(pub String);
