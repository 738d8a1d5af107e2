//! Create, update and cancel timers, keeping the job queue in step.
//!
//! Every operation writes the store first. Queue calls follow the write and
//! their failures are logged, not returned: the stored timer is the truth and
//! the [`Reconciler`](crate::Reconciler) resubmits anything the queue lost.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use lapse_core::{needs_reschedule, NewTimer, SharedClock, Timer, TimerChanges, ValidationError};
use lapse_queue::{JobQueue, QueueError};

use crate::error::TimerError;
use crate::job::TimerJob;
use crate::store::TimerStore;

pub struct TimerLifecycle {
    store: Arc<dyn TimerStore>,
    queue: Arc<dyn JobQueue>,
    clock: SharedClock,
}

impl TimerLifecycle {
    pub fn new(store: Arc<dyn TimerStore>, queue: Arc<dyn JobQueue>, clock: SharedClock) -> Self {
        Self { store, queue, clock }
    }

    pub fn store(&self) -> &Arc<dyn TimerStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Validate, persist and schedule a new timer.
    ///
    /// A timer whose `execute_at` has already passed is accepted and fires
    /// immediately.
    pub async fn create(&self, attrs: NewTimer) -> Result<Timer, TimerError> {
        let timer = attrs.into_timer(Uuid::new_v4(), self.now())?;
        self.persist(timer).await
    }

    /// Cancel the topic's current public timer, if any, and create `attrs`
    /// in its place.
    ///
    /// `attrs` is validated before anything is cancelled. Two replacements
    /// racing on one topic still leave a single public timer; the loser gets
    /// the duplicate validation error.
    pub async fn set_public_timer(&self, attrs: NewTimer) -> Result<Timer, TimerError> {
        let timer = attrs.into_timer(Uuid::new_v4(), self.now())?;
        if timer.is_public() {
            if let Some(existing) = self.store.active_public_for_target(timer.target_id).await? {
                debug!(timer_id = %existing.id, topic_id = %timer.target_id, "replacing public timer");
                self.cancel(existing.id).await?;
            }
        }
        self.persist(timer).await
    }

    /// Apply `changes` to a pending timer.
    ///
    /// The job is rescheduled only when `execute_at` or `user_id` changed,
    /// and always as cancel-then-schedule.
    pub async fn update(&self, timer_id: Uuid, changes: TimerChanges) -> Result<Timer, TimerError> {
        let current = self
            .store
            .get(timer_id)
            .await?
            .ok_or(TimerError::NotFound(timer_id))?;
        let next = changes.apply(&current)?;
        if next == current {
            return Ok(current);
        }

        let Some(stored) = self.store.update_schedule(&next).await? else {
            // Cancelled or executed since the read above.
            return Err(self.not_updatable(timer_id).await);
        };

        if needs_reschedule(&current, &stored) {
            self.cancel_job(&current).await;
            self.submit_logged(&stored).await;
        }
        info!(timer_id = %stored.id, execute_at = %stored.execute_at, "timer updated");
        Ok(stored)
    }

    /// Soft-delete a timer and drop its job. Cancelling twice is harmless and
    /// keeps the first `deleted_at`.
    pub async fn cancel(&self, timer_id: Uuid) -> Result<Timer, TimerError> {
        let timer = self
            .store
            .soft_delete(timer_id, self.now())
            .await?
            .ok_or(TimerError::NotFound(timer_id))?;
        self.cancel_job(&timer).await;
        info!(timer_id = %timer.id, topic_id = %timer.target_id, kind = %timer.kind, "timer cancelled");
        Ok(timer)
    }

    pub async fn get(&self, timer_id: Uuid) -> Result<Option<Timer>, TimerError> {
        Ok(self.store.get(timer_id).await?)
    }

    pub async fn public_timer_for(&self, target_id: Uuid) -> Result<Option<Timer>, TimerError> {
        Ok(self.store.active_public_for_target(target_id).await?)
    }

    pub async fn timers_for(&self, target_id: Uuid) -> Result<Vec<Timer>, TimerError> {
        Ok(self.store.for_target(target_id).await?)
    }

    /// Hand a timer's job to the queue, firing no earlier than now.
    ///
    /// Returns `Ok(false)` for kinds that are not scheduled here.
    pub async fn submit(&self, timer: &Timer) -> Result<bool, QueueError> {
        match TimerJob::to_scheduled(timer, self.now())? {
            Some(job) => {
                self.queue.schedule(job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn persist(&self, timer: Timer) -> Result<Timer, TimerError> {
        let timer = self.store.insert(&timer).await?;
        info!(
            timer_id = %timer.id,
            topic_id = %timer.target_id,
            kind = %timer.kind,
            execute_at = %timer.execute_at,
            "timer created"
        );
        self.submit_logged(&timer).await;
        Ok(timer)
    }

    async fn submit_logged(&self, timer: &Timer) {
        match self.submit(timer).await {
            Ok(true) => debug!(timer_id = %timer.id, run_at = %timer.fire_at(self.now()), "timer job scheduled"),
            Ok(false) => {}
            Err(e) => warn!(
                timer_id = %timer.id,
                error = %e,
                "failed to schedule timer job, reconciler will resubmit once due"
            ),
        }
    }

    async fn cancel_job(&self, timer: &Timer) {
        let Some(job_kind) = timer.kind.job_kind() else {
            return;
        };
        if let Err(e) = self.queue.cancel(job_kind, &timer.job_key()).await {
            warn!(timer_id = %timer.id, error = %e, "failed to cancel timer job");
        }
    }

    /// Explain why a conditional update matched no pending row.
    async fn not_updatable(&self, timer_id: Uuid) -> TimerError {
        match self.store.get(timer_id).await {
            Ok(Some(t)) if t.is_deleted() => ValidationError::Deleted { id: t.id }.into(),
            Ok(Some(t)) if t.is_processed() => ValidationError::Processed { id: t.id }.into(),
            Ok(_) => TimerError::NotFound(timer_id),
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use lapse_core::{Clock, ManualClock, TimerKind, TOGGLE_TOPIC_JOB};
    use lapse_queue::{LocalJobQueue, LocalQueueConfig};

    use super::*;
    use crate::store::MemoryTimerStore;

    struct Harness {
        lifecycle: TimerLifecycle,
        store: Arc<MemoryTimerStore>,
        queue: Arc<LocalJobQueue>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryTimerStore::new());
        let queue = Arc::new(LocalJobQueue::new(LocalQueueConfig::default(), clock.clone()));
        let lifecycle = TimerLifecycle::new(store.clone(), queue.clone(), clock.clone());
        Harness { lifecycle, store, queue, clock }
    }

    fn close_in(h: &Harness, topic: Uuid, hours: i64) -> NewTimer {
        NewTimer::new(topic, TimerKind::Close, h.clock.now() + Duration::hours(hours)).by(Uuid::new_v4())
    }

    #[tokio::test]
    async fn create_schedules_keyed_by_timer() {
        let h = harness();
        let timer = h.lifecycle.create(close_in(&h, Uuid::new_v4(), 1)).await.unwrap();

        assert!(h.queue.is_scheduled(TOGGLE_TOPIC_JOB, &timer.job_key()));
        assert_eq!(h.queue.pending()[0].run_at, timer.execute_at);
    }

    #[tokio::test]
    async fn invalid_create_writes_nothing() {
        let h = harness();
        let err = h.lifecycle.create(close_in(&h, Uuid::new_v4(), -1)).await.unwrap_err();
        assert_eq!(err.validation().map(ValidationError::field), Some("execute_at"));
        assert!(h.store.is_empty());
        assert_eq!(h.queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn reminders_are_stored_but_not_scheduled() {
        let h = harness();
        let attrs = NewTimer::new(Uuid::new_v4(), TimerKind::Reminder, h.clock.now()).by(Uuid::new_v4());
        h.lifecycle.create(attrs).await.unwrap();
        assert_eq!(h.store.len(), 1);
        assert_eq!(h.queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn rescheduling_moves_the_job() {
        let h = harness();
        let timer = h.lifecycle.create(close_in(&h, Uuid::new_v4(), 1)).await.unwrap();
        let later = h.clock.now() + Duration::hours(3);

        let updated = h
            .lifecycle
            .update(timer.id, TimerChanges::default().execute_at(later))
            .await
            .unwrap();
        assert_eq!(updated.execute_at, later);
        assert_eq!(h.queue.pending_len(), 1);
        assert_eq!(h.queue.pending()[0].run_at, later);
    }

    #[tokio::test]
    async fn update_of_unknown_timer_is_not_found() {
        let h = harness();
        let err = h
            .lifecycle
            .update(Uuid::new_v4(), TimerChanges::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TimerError::NotFound(_)));
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn cancelled_timers_reject_updates() {
        let h = harness();
        let timer = h.lifecycle.create(close_in(&h, Uuid::new_v4(), 1)).await.unwrap();
        h.lifecycle.cancel(timer.id).await.unwrap();

        let err = h
            .lifecycle
            .update(timer.id, TimerChanges::default().execute_at(h.clock.now()))
            .await
            .unwrap_err();
        assert_eq!(err.validation(), Some(&ValidationError::Deleted { id: timer.id }));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let h = harness();
        let timer = h.lifecycle.create(close_in(&h, Uuid::new_v4(), 1)).await.unwrap();

        let first = h.lifecycle.cancel(timer.id).await.unwrap();
        h.clock.advance(Duration::minutes(1));
        let second = h.lifecycle.cancel(timer.id).await.unwrap();

        assert_eq!(first.deleted_at, second.deleted_at);
        assert_eq!(h.queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn set_public_timer_replaces_the_current_one() {
        let h = harness();
        let topic = Uuid::new_v4();
        let old = h.lifecycle.create(close_in(&h, topic, 1)).await.unwrap();

        let attrs = NewTimer::new(topic, TimerKind::Delete, h.clock.now() + Duration::hours(2)).by(Uuid::new_v4());
        let new = h.lifecycle.set_public_timer(attrs).await.unwrap();

        assert_eq!(h.lifecycle.public_timer_for(topic).await.unwrap(), Some(new.clone()));
        assert!(h.lifecycle.get(old.id).await.unwrap().unwrap().is_deleted());
        assert!(!h.queue.is_scheduled(TOGGLE_TOPIC_JOB, &old.job_key()));
        assert_eq!(h.lifecycle.timers_for(topic).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_replacement_keeps_the_current_timer() {
        let h = harness();
        let topic = Uuid::new_v4();
        let old = h.lifecycle.create(close_in(&h, topic, 1)).await.unwrap();

        let attrs = NewTimer::new(topic, TimerKind::PublishToCategory, h.clock.now()).by(Uuid::new_v4());
        let err = h.lifecycle.set_public_timer(attrs).await.unwrap_err();

        assert_eq!(err.validation().map(ValidationError::field), Some("category_id"));
        assert_eq!(h.lifecycle.public_timer_for(topic).await.unwrap(), Some(old));
    }
}
