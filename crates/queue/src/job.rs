//! Scheduled job envelope.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a scheduled job: the handler it targets plus a caller-chosen
/// key. Scheduling the same identity twice replaces the earlier instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub kind: String,
    pub key: String,
}

impl JobKey {
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self { kind: kind.into(), key: key.into() }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// "Run handler `kind` with `payload` at `run_at`."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub kind: String,
    pub key: String,
    pub payload: serde_json::Value,
    pub run_at: DateTime<Utc>,
}

impl ScheduledJob {
    pub fn new(
        kind: impl Into<String>,
        key: impl Into<String>,
        payload: serde_json::Value,
        run_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
            payload,
            run_at,
        }
    }

    pub fn job_key(&self) -> JobKey {
        JobKey::new(self.kind.clone(), self.key.clone())
    }
}

/// A job handed to its handler.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub job: ScheduledJob,
    /// 1 on first delivery.
    pub attempt: u32,
}

impl Delivery {
    /// Decode the payload into the handler's own type.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.job.payload.clone())
    }
}
