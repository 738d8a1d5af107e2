//! The topic side of timer execution.
//!
//! Topics are owned elsewhere; timers only read a [`TopicSnapshot`] and ask
//! for one of a handful of state changes.

mod memory;
mod postgres;

pub use memory::MemoryTopicProvider;
pub use postgres::PgTopicProvider;

use async_trait::async_trait;
use uuid::Uuid;

use lapse_core::TopicSnapshot;

use crate::error::TopicError;

#[async_trait]
pub trait TopicProvider: Send + Sync {
    /// Look up a topic. Soft-deleted topics are returned with `deleted = true`;
    /// `None` means the topic does not exist at all.
    async fn get(&self, id: Uuid) -> Result<Option<TopicSnapshot>, TopicError>;

    async fn set_open_state(&self, id: Uuid, open: bool) -> Result<(), TopicError>;

    async fn publish_to_category(&self, id: Uuid, category_id: Uuid) -> Result<(), TopicError>;

    async fn mark_deleted(&self, id: Uuid) -> Result<(), TopicError>;

    async fn bump(&self, id: Uuid) -> Result<(), TopicError>;
}
