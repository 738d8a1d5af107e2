use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The slice of a topic's state that timer execution reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSnapshot {
    pub id: Uuid,
    pub closed: bool,
    /// Soft-deleted topics are still returned by lookups.
    pub deleted: bool,
    pub category_id: Option<Uuid>,
    pub bumped_at: Option<DateTime<Utc>>,
}

impl TopicSnapshot {
    pub fn is_open(&self) -> bool {
        !self.closed
    }
}
