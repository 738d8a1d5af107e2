//! Job payload carried from the lifecycle to the executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lapse_core::{Timer, TimerKind};
use lapse_queue::{QueueError, ScheduledJob};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerJob {
    pub timer_id: Uuid,
    pub kind: TimerKind,
    /// Desired open state, present for close and open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<bool>,
}

impl TimerJob {
    pub fn for_timer(timer: &Timer) -> Self {
        Self {
            timer_id: timer.id,
            kind: timer.kind,
            open: timer.kind.desired_open(),
        }
    }

    /// Build the queue entry for `timer`, or `None` for kinds that are not
    /// scheduled here.
    pub fn to_scheduled(timer: &Timer, now: DateTime<Utc>) -> Result<Option<ScheduledJob>, QueueError> {
        let Some(job_kind) = timer.kind.job_kind() else {
            return Ok(None);
        };
        let payload = serde_json::to_value(Self::for_timer(timer))?;
        Ok(Some(ScheduledJob::new(
            job_kind,
            timer.job_key(),
            payload,
            timer.fire_at(now),
        )))
    }
}
