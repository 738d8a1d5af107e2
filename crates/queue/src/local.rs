//! In-process job queue.
//!
//! Keeps pending jobs in memory and delivers them from a tokio poll loop.
//! Everything pending is lost when the process exits; callers that need
//! durability rebuild the queue from their own records on boot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use lapse_core::config::TimerConfig;
use lapse_core::SharedClock;

use crate::error::QueueError;
use crate::job::{Delivery, JobKey, ScheduledJob};
use crate::runner::{JobHandler, JobQueue};

#[derive(Debug, Clone)]
pub struct LocalQueueConfig {
    pub poll_interval: Duration,
    /// Deliveries per job before a retryable failure is dropped.
    pub max_attempts: u32,
    /// Delay added per attempt before a retryable job is delivered again.
    pub retry_backoff: Duration,
}

impl Default for LocalQueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_attempts: 5,
            retry_backoff: Duration::from_secs(30),
        }
    }
}

impl From<&TimerConfig> for LocalQueueConfig {
    fn from(config: &TimerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: config.retry_backoff(),
        }
    }
}

/// Counters for one pass over the due jobs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub delivered: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone)]
struct PendingJob {
    job: ScheduledJob,
    /// Deliveries already made.
    attempts: u32,
}

pub struct LocalJobQueue {
    pending: Mutex<HashMap<JobKey, PendingJob>>,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    config: LocalQueueConfig,
    clock: SharedClock,
}

impl LocalJobQueue {
    pub fn new(config: LocalQueueConfig, clock: SharedClock) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// Route jobs of `kind` to `handler`. Replaces any earlier registration.
    pub fn register_handler(&self, kind: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let kind = kind.into();
        info!(job_kind = %kind, "registered job handler");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, handler);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Snapshot of pending jobs, earliest first.
    pub fn pending(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|p| p.job.clone())
            .collect();
        jobs.sort_by_key(|j| j.run_at);
        jobs
    }

    pub fn is_scheduled(&self, kind: &str, key: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&JobKey::new(kind, key))
    }

    /// Deliver every job whose `run_at` has passed, one at a time.
    pub async fn run_due(&self) -> RunReport {
        let mut report = RunReport::default();
        let due = self.take_due(self.clock.now());

        for pending in due {
            let attempt = pending.attempts + 1;
            let Some(handler) = self.handler_for(&pending.job.kind) else {
                warn!(job = %pending.job.job_key(), "no handler registered for job kind, dropping");
                report.dropped += 1;
                continue;
            };

            let delivery = Delivery { job: pending.job, attempt };
            report.delivered += 1;

            match handler.handle(&delivery).await {
                Ok(()) => {
                    debug!(job = %delivery.job.job_key(), attempt, "job completed");
                    report.succeeded += 1;
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    let run_at = self.retry_at(attempt);
                    warn!(
                        job = %delivery.job.job_key(),
                        attempt,
                        retry_at = %run_at,
                        error = %e,
                        "job failed, will retry"
                    );
                    self.requeue(delivery.job, attempt, run_at);
                    report.retried += 1;
                }
                Err(e) => {
                    warn!(job = %delivery.job.job_key(), attempt, error = %e, "job failed, dropping");
                    report.dropped += 1;
                }
            }
        }

        report
    }

    /// Poll for due jobs until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "local job queue started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    let report = self.run_due().await;
                    if report.delivered > 0 {
                        debug!(?report, "job queue tick");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(pending = self.pending_len(), "local job queue stopped");
    }

    fn take_due(&self, now: DateTime<Utc>) -> Vec<PendingJob> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let keys: Vec<JobKey> = pending
            .iter()
            .filter(|(_, p)| p.job.run_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        let mut due: Vec<PendingJob> = keys.iter().filter_map(|k| pending.remove(k)).collect();
        due.sort_by_key(|p| p.job.run_at);
        due
    }

    fn handler_for(&self, kind: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
    }

    /// Linear backoff from now, saturating at the latest representable time.
    fn retry_at(&self, attempt: u32) -> DateTime<Utc> {
        let delay = self.config.retry_backoff.saturating_mul(attempt);
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| self.clock.now().checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Put a failed job back unless it was rescheduled while it ran.
    fn requeue(&self, mut job: ScheduledJob, attempts: u32, run_at: DateTime<Utc>) {
        job.run_at = run_at;
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(job.job_key())
            .or_insert(PendingJob { job, attempts });
    }
}

#[async_trait]
impl JobQueue for LocalJobQueue {
    async fn schedule(&self, job: ScheduledJob) -> Result<(), QueueError> {
        debug!(job = %job.job_key(), run_at = %job.run_at, "job scheduled");
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.job_key(), PendingJob { job, attempts: 0 });
        Ok(())
    }

    async fn cancel(&self, kind: &str, key: &str) -> Result<bool, QueueError> {
        let removed = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&JobKey::new(kind, key))
            .is_some();
        debug!(job_kind = kind, key, removed, "job cancel");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Duration as ChronoDuration;
    use lapse_core::ManualClock;

    use super::*;
    use crate::error::JobError;

    /// Handler that fails with a retryable error a fixed number of times.
    struct FlakyHandler {
        calls: AtomicUsize,
        failures: usize,
    }

    impl FlakyHandler {
        fn new(failures: usize) -> Self {
            Self { calls: AtomicUsize::new(0), failures }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, _delivery: &Delivery) -> Result<(), JobError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(JobError::Retryable("database busy".into()))
            } else {
                Ok(())
            }
        }
    }

    fn queue_at(start: DateTime<Utc>) -> (LocalJobQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let config = LocalQueueConfig {
            poll_interval: Duration::from_millis(10),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(10),
        };
        (LocalJobQueue::new(config, clock.clone()), clock)
    }

    fn job(key: &str, run_at: DateTime<Utc>) -> ScheduledJob {
        ScheduledJob::new("test", key, serde_json::json!({}), run_at)
    }

    #[tokio::test]
    async fn schedule_replaces_same_key() {
        let now = Utc::now();
        let (queue, _) = queue_at(now);
        queue.schedule(job("a", now + ChronoDuration::hours(1))).await.unwrap();
        queue.schedule(job("a", now + ChronoDuration::hours(2))).await.unwrap();
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(queue.pending()[0].run_at, now + ChronoDuration::hours(2));
    }

    #[tokio::test]
    async fn cancel_reports_whether_anything_was_removed() {
        let now = Utc::now();
        let (queue, _) = queue_at(now);
        queue.schedule(job("a", now)).await.unwrap();
        assert!(queue.cancel("test", "a").await.unwrap());
        assert!(!queue.cancel("test", "a").await.unwrap());
        assert!(!queue.is_scheduled("test", "a"));
    }

    #[tokio::test]
    async fn only_due_jobs_are_delivered() {
        let now = Utc::now();
        let (queue, clock) = queue_at(now);
        let handler = Arc::new(FlakyHandler::new(0));
        queue.register_handler("test", handler.clone());

        queue.schedule(job("now", now)).await.unwrap();
        queue.schedule(job("later", now + ChronoDuration::minutes(5))).await.unwrap();

        let report = queue.run_due().await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(handler.calls(), 1);
        assert!(queue.is_scheduled("test", "later"));

        clock.advance(ChronoDuration::minutes(5));
        queue.run_due().await;
        assert_eq!(handler.calls(), 2);
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn retryable_failures_back_off_then_give_up() {
        let now = Utc::now();
        let (queue, clock) = queue_at(now);
        let handler = Arc::new(FlakyHandler::new(usize::MAX));
        queue.register_handler("test", handler.clone());
        queue.schedule(job("a", now)).await.unwrap();

        let report = queue.run_due().await;
        assert_eq!(report.retried, 1);
        assert_eq!(queue.pending()[0].run_at, now + ChronoDuration::seconds(10));

        // Not due yet.
        assert_eq!(queue.run_due().await.delivered, 0);

        clock.advance(ChronoDuration::seconds(10));
        assert_eq!(queue.run_due().await.retried, 1);

        clock.advance(ChronoDuration::seconds(20));
        let report = queue.run_due().await;
        assert_eq!(report.dropped, 1);
        assert_eq!(handler.calls(), 3);
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn retry_succeeds_on_second_attempt() {
        let now = Utc::now();
        let (queue, clock) = queue_at(now);
        let handler = Arc::new(FlakyHandler::new(1));
        queue.register_handler("test", handler.clone());
        queue.schedule(job("a", now)).await.unwrap();

        queue.run_due().await;
        clock.advance(ChronoDuration::seconds(10));
        let report = queue.run_due().await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn huge_backoff_saturates_instead_of_overflowing() {
        let now = Utc::now();
        let clock = Arc::new(ManualClock::new(now));
        let config = LocalQueueConfig {
            poll_interval: Duration::from_millis(10),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(10_000_000_000_000),
        };
        let queue = LocalJobQueue::new(config, clock);
        queue.register_handler("test", Arc::new(FlakyHandler::new(usize::MAX)));
        queue.schedule(job("a", now)).await.unwrap();

        let report = queue.run_due().await;
        assert_eq!(report.retried, 1);
        assert_eq!(queue.pending()[0].run_at, DateTime::<Utc>::MAX_UTC);
    }

    #[tokio::test]
    async fn jobs_without_a_handler_are_dropped() {
        let now = Utc::now();
        let (queue, _) = queue_at(now);
        queue.schedule(job("a", now)).await.unwrap();
        let report = queue.run_due().await;
        assert_eq!(report.dropped, 1);
        assert_eq!(report.delivered, 0);
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown() {
        let (queue, _) = queue_at(Utc::now());
        let queue = Arc::new(queue);
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn({
            let queue = queue.clone();
            async move { queue.run(rx).await }
        });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
