//! Applies a due timer to its topic.
//!
//! Delivery is at least once, so every path is guarded: a cancelled,
//! processed or not-yet-due timer is left alone, and a topic already in the
//! desired state is not touched again. A timer is marked processed only after
//! its transition (or a terminal skip), so a transient failure leaves it for
//! the next delivery.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lapse_core::{SharedClock, Timer, TimerKind, TopicSnapshot};
use lapse_queue::{Delivery, JobError, JobHandler, LocalJobQueue};

use crate::error::{ExecutionError, TopicError};
use crate::job::TimerJob;
use crate::store::TimerStore;
use crate::topics::TopicProvider;

/// What one execution did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The topic was changed.
    Applied,
    /// The topic was already in the desired state.
    AlreadySatisfied,
    /// The topic is deleted and the action only makes sense on a live one.
    SkippedDeletedTarget,
    /// The topic does not exist.
    TargetMissing,
    /// The timer is missing or cancelled.
    TimerGone,
    AlreadyProcessed,
    /// A stale job for a timer that was moved later.
    NotYetDue,
    NotSchedulable,
}

impl ExecutionOutcome {
    /// Whether this outcome consumes the timer.
    pub fn marks_processed(self) -> bool {
        matches!(
            self,
            Self::Applied | Self::AlreadySatisfied | Self::SkippedDeletedTarget | Self::TargetMissing
        )
    }
}

pub struct TimerExecutor {
    store: Arc<dyn TimerStore>,
    topics: Arc<dyn TopicProvider>,
    clock: SharedClock,
}

impl TimerExecutor {
    pub fn new(store: Arc<dyn TimerStore>, topics: Arc<dyn TopicProvider>, clock: SharedClock) -> Self {
        Self { store, topics, clock }
    }

    /// Route every job kind a timer can produce to this executor.
    pub fn register(self: &Arc<Self>, queue: &LocalJobQueue) {
        let mut kinds: Vec<&'static str> = TimerKind::ALL.iter().filter_map(|k| k.job_kind()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        for kind in kinds {
            queue.register_handler(kind, self.clone());
        }
    }

    /// Execute timer `timer_id`. `open` overrides the desired open state for
    /// close/open timers.
    pub async fn execute(&self, timer_id: Uuid, open: Option<bool>) -> Result<ExecutionOutcome, ExecutionError> {
        let Some(timer) = self.store.get(timer_id).await? else {
            debug!(timer_id = %timer_id, "timer no longer exists, skipping");
            return Ok(ExecutionOutcome::TimerGone);
        };
        if timer.is_deleted() {
            debug!(timer_id = %timer_id, "timer was cancelled, skipping");
            return Ok(ExecutionOutcome::TimerGone);
        }
        if timer.is_processed() {
            debug!(timer_id = %timer_id, "timer already processed, skipping");
            return Ok(ExecutionOutcome::AlreadyProcessed);
        }
        if !timer.kind.is_schedulable() {
            warn!(timer_id = %timer_id, kind = %timer.kind, "timer kind is not executed here");
            return Ok(ExecutionOutcome::NotSchedulable);
        }
        if !timer.is_due(self.clock.now()) {
            debug!(timer_id = %timer_id, execute_at = %timer.execute_at, "stale delivery, timer not due yet");
            return Ok(ExecutionOutcome::NotYetDue);
        }

        let outcome = self.apply(&timer, open).await?;
        if outcome.marks_processed() {
            self.store.mark_processed(timer.id, self.clock.now()).await?;
        }
        info!(
            timer_id = %timer.id,
            topic_id = %timer.target_id,
            kind = %timer.kind,
            ?outcome,
            "timer executed"
        );
        Ok(outcome)
    }

    async fn apply(&self, timer: &Timer, open: Option<bool>) -> Result<ExecutionOutcome, ExecutionError> {
        let topic = match self.topics.get(timer.target_id).await {
            Ok(Some(topic)) => topic,
            Ok(None) | Err(TopicError::NotFound(_)) => return Ok(ExecutionOutcome::TargetMissing),
            Err(TopicError::Unavailable(reason)) => return Err(ExecutionError::Retryable(reason)),
        };

        if topic.deleted && timer.kind.requires_live_target() {
            return Ok(ExecutionOutcome::SkippedDeletedTarget);
        }

        match timer.kind {
            TimerKind::Close | TimerKind::Open => {
                let want_open = open.unwrap_or(timer.kind == TimerKind::Open);
                self.set_open_state(&topic, want_open).await
            }
            TimerKind::Delete => {
                if topic.deleted {
                    return Ok(ExecutionOutcome::AlreadySatisfied);
                }
                applied(self.topics.mark_deleted(topic.id).await)
            }
            TimerKind::PublishToCategory => {
                let category_id = timer.category_id.ok_or_else(|| ExecutionError::Invalid {
                    id: timer.id,
                    reason: "publish timer has no category".into(),
                })?;
                if topic.category_id == Some(category_id) {
                    return Ok(ExecutionOutcome::AlreadySatisfied);
                }
                applied(self.topics.publish_to_category(topic.id, category_id).await)
            }
            TimerKind::Bump => applied(self.topics.bump(topic.id).await),
            TimerKind::Reminder => Ok(ExecutionOutcome::NotSchedulable),
        }
    }

    async fn set_open_state(&self, topic: &TopicSnapshot, open: bool) -> Result<ExecutionOutcome, ExecutionError> {
        if topic.is_open() == open {
            return Ok(ExecutionOutcome::AlreadySatisfied);
        }
        applied(self.topics.set_open_state(topic.id, open).await)
    }
}

fn applied(result: Result<(), TopicError>) -> Result<ExecutionOutcome, ExecutionError> {
    match result {
        Ok(()) => Ok(ExecutionOutcome::Applied),
        // Vanished between the read and the write.
        Err(TopicError::NotFound(_)) => Ok(ExecutionOutcome::TargetMissing),
        Err(TopicError::Unavailable(reason)) => Err(ExecutionError::Retryable(reason)),
    }
}

#[async_trait]
impl JobHandler for TimerExecutor {
    async fn handle(&self, delivery: &Delivery) -> Result<(), JobError> {
        let job: TimerJob = delivery.payload().map_err(ExecutionError::from)?;
        debug!(timer_id = %job.timer_id, attempt = delivery.attempt, "executing timer job");
        self.execute(job.timer_id, job.open).await?;
        Ok(())
    }
}
