//! Durable timer records.
//!
//! The store is the single source of truth for timers; the job queue only
//! caches scheduling intent derived from it. Implementations must enforce
//! "at most one pending public timer per topic" atomically with the write.

mod memory;
mod postgres;

pub use memory::MemoryTimerStore;
pub use postgres::PgTimerStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use lapse_core::Timer;

use crate::error::StoreError;

#[async_trait]
pub trait TimerStore: Send + Sync {
    /// Persist a new timer. Fails with [`StoreError::DuplicatePublicTimer`]
    /// when the topic already has a pending public timer.
    async fn insert(&self, timer: &Timer) -> Result<Timer, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Timer>, StoreError>;

    /// Write `execute_at`, `user_id` and `category_id` of a pending timer.
    ///
    /// Returns `None` if the timer is missing, deleted or processed.
    async fn update_schedule(&self, timer: &Timer) -> Result<Option<Timer>, StoreError>;

    /// Set `deleted_at` unless already set. Returns the row as stored.
    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Timer>, StoreError>;

    /// Set `processed_at` on a timer that has none.
    ///
    /// Returns `true` if this call set the marker.
    async fn mark_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// The topic's pending public timer, if any.
    async fn active_public_for_target(&self, target_id: Uuid) -> Result<Option<Timer>, StoreError>;

    /// Every timer on a topic, including deleted and processed ones, oldest first.
    async fn for_target(&self, target_id: Uuid) -> Result<Vec<Timer>, StoreError>;

    /// Pending schedulable timers with `execute_at <= now`. The topic's own
    /// state is not consulted, so timers on deleted topics are included.
    async fn due_unprocessed(&self, now: DateTime<Utc>) -> Result<Vec<Timer>, StoreError>;

    /// Every pending schedulable timer, due or not.
    async fn pending_unprocessed(&self) -> Result<Vec<Timer>, StoreError>;
}
