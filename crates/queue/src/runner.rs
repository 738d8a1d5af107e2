//! Deferred job queue and handler traits.

use async_trait::async_trait;

use crate::error::{JobError, QueueError};
use crate::job::{Delivery, ScheduledJob};

/// A deferred task runner.
///
/// Implementations deliver every scheduled job at least once, at or after
/// its `run_at`. Cancellation is best effort: a job already handed to its
/// handler cannot be recalled.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Schedule a job. An existing job with the same kind and key is replaced.
    async fn schedule(&self, job: ScheduledJob) -> Result<(), QueueError>;

    /// Cancel the pending job with this kind and key.
    ///
    /// Returns `true` if a pending job was removed.
    async fn cancel(&self, kind: &str, key: &str) -> Result<bool, QueueError>;
}

/// Work performed when a job of a given kind comes due.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Result<(), JobError>;
}
