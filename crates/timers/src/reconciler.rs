//! Resubmits timers whose job the queue lost.
//!
//! The reconciler only reads timers and calls the queue. Resubmitting a
//! timer that is still queued replaces the identical job, and the executor
//! ignores anything already processed, so running it often (or twice at once)
//! is safe.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use lapse_core::Timer;

use crate::error::StoreError;
use crate::lifecycle::TimerLifecycle;

/// Counters for one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub found: usize,
    pub submitted: usize,
    pub failed: usize,
}

pub struct Reconciler {
    lifecycle: Arc<TimerLifecycle>,
}

impl Reconciler {
    pub fn new(lifecycle: Arc<TimerLifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Resubmit every pending timer that is due, including timers whose
    /// topic has been deleted.
    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let now = self.lifecycle.now();
        let due = self.lifecycle.store().due_unprocessed(now).await?;
        let report = self.resubmit(&due).await;
        if report.found > 0 {
            info!(found = report.found, submitted = report.submitted, failed = report.failed, "reconciled due timers");
        } else {
            debug!("no due timers to reconcile");
        }
        Ok(report)
    }

    /// Resubmit every pending timer, due or not. Run once on boot when the
    /// queue does not survive a restart.
    pub async fn rehydrate(&self) -> Result<ReconcileReport, StoreError> {
        let pending = self.lifecycle.store().pending_unprocessed().await?;
        let report = self.resubmit(&pending).await;
        info!(found = report.found, submitted = report.submitted, failed = report.failed, "rehydrated timer jobs");
        Ok(report)
    }

    /// Call [`reconcile`](Self::reconcile) every `interval` until `shutdown`
    /// flips to `true` or its sender is dropped.
    pub async fn run_periodic(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "timer reconciler started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile().await {
                        error!(error = %e, "timer reconciliation failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("timer reconciler stopped");
    }

    async fn resubmit(&self, timers: &[Timer]) -> ReconcileReport {
        let mut report = ReconcileReport { found: timers.len(), ..Default::default() };
        for timer in timers {
            match self.lifecycle.submit(timer).await {
                Ok(true) => report.submitted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(timer_id = %timer.id, error = %e, "failed to resubmit timer");
                    report.failed += 1;
                }
            }
        }
        report
    }
}
