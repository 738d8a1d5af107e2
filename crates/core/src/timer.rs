//! Timer records: a single deferred, one-shot action on a target topic.
//!
//! The kind set is closed. Membership questions (public? schedulable? does
//! the action still make sense on a deleted topic?) are answered by
//! [`TimerKind`] itself rather than by lookup tables.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{UnknownTimerKind, ValidationError};

// ── Kinds ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    Close,
    Open,
    Delete,
    PublishToCategory,
    /// Per-user reminder. Stored here, delivered elsewhere.
    Reminder,
    /// Moves the topic back to the top of its listing.
    Bump,
}

/// Job kind that toggles a topic's open/closed flag. Shared by close and open.
pub const TOGGLE_TOPIC_JOB: &str = "toggle_topic_closed";
pub const DELETE_TOPIC_JOB: &str = "delete_topic";
pub const PUBLISH_TOPIC_JOB: &str = "publish_topic_to_category";
pub const BUMP_TOPIC_JOB: &str = "bump_topic";

impl TimerKind {
    pub const ALL: [TimerKind; 6] = [
        Self::Close,
        Self::Open,
        Self::Delete,
        Self::PublishToCategory,
        Self::Reminder,
        Self::Bump,
    ];

    /// Stable name used in storage and job payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Close => "close",
            Self::Open => "open",
            Self::Delete => "delete",
            Self::PublishToCategory => "publish_to_category",
            Self::Reminder => "reminder",
            Self::Bump => "bump",
        }
    }

    /// Public kinds are user visible; at most one may be active per topic.
    pub fn is_public(self) -> bool {
        matches!(
            self,
            Self::Close | Self::Open | Self::Delete | Self::PublishToCategory
        )
    }

    /// Whether timers of this kind are submitted to the job queue.
    pub fn is_schedulable(self) -> bool {
        self.job_kind().is_some()
    }

    /// The executor entry point for this kind, if it is scheduled here at all.
    pub fn job_kind(self) -> Option<&'static str> {
        match self {
            Self::Close | Self::Open => Some(TOGGLE_TOPIC_JOB),
            Self::Delete => Some(DELETE_TOPIC_JOB),
            Self::PublishToCategory => Some(PUBLISH_TOPIC_JOB),
            Self::Bump => Some(BUMP_TOPIC_JOB),
            Self::Reminder => None,
        }
    }

    /// Kinds whose action is meaningless once the topic is soft-deleted.
    /// Close/open still apply to a deleted topic; delete is already satisfied.
    pub fn requires_live_target(self) -> bool {
        matches!(self, Self::PublishToCategory | Self::Bump)
    }

    /// Desired open state for the close/open pair.
    pub fn desired_open(self) -> Option<bool> {
        match self {
            Self::Close => Some(false),
            Self::Open => Some(true),
            _ => None,
        }
    }

    /// Storage names of the public kinds, for SQL predicates.
    pub fn public_names() -> Vec<&'static str> {
        Self::ALL
            .iter()
            .copied()
            .filter(|k| k.is_public())
            .map(Self::as_str)
            .collect()
    }

    /// Storage names of the schedulable kinds, for SQL predicates.
    pub fn schedulable_names() -> Vec<&'static str> {
        Self::ALL
            .iter()
            .copied()
            .filter(|k| k.is_schedulable())
            .map(Self::as_str)
            .collect()
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimerKind {
    type Err = UnknownTimerKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownTimerKind(s.to_string()))
    }
}

// ── Timer ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub id: Uuid,
    pub target_id: Uuid,
    pub kind: TimerKind,
    pub execute_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Actor on whose behalf the action runs.
    pub user_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Timer {
    pub fn is_public(&self) -> bool {
        self.kind.is_public()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    /// Neither cancelled nor consumed.
    pub fn is_pending(&self) -> bool {
        !self.is_deleted() && !self.is_processed()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.execute_at <= now
    }

    /// When the job should run: overdue timers fire immediately.
    pub fn fire_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.execute_at.max(now)
    }

    /// Job queue key. One live job per timer.
    pub fn job_key(&self) -> String {
        self.id.to_string()
    }
}

// ── Create / update requests ──────────────────────────────────

/// Attributes for a new timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTimer {
    pub target_id: Uuid,
    pub kind: TimerKind,
    pub execute_at: Option<DateTime<Utc>>,
    pub user_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
}

impl NewTimer {
    pub fn new(target_id: Uuid, kind: TimerKind, execute_at: DateTime<Utc>) -> Self {
        Self {
            target_id,
            kind,
            execute_at: Some(execute_at),
            user_id: None,
            category_id: None,
        }
    }

    pub fn by(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn in_category(mut self, category_id: Uuid) -> Self {
        self.category_id = Some(category_id);
        self
    }

    /// Check every row-local invariant and build the record that would be
    /// stored. Uniqueness across rows is left to the store.
    pub fn into_timer(self, id: Uuid, created_at: DateTime<Utc>) -> Result<Timer, ValidationError> {
        let execute_at = self
            .execute_at
            .ok_or(ValidationError::Missing { field: "execute_at" })?;
        let timer = Timer {
            id,
            target_id: self.target_id,
            kind: self.kind,
            execute_at,
            created_at,
            user_id: self.user_id,
            category_id: self.category_id,
            deleted_at: None,
            processed_at: None,
        };
        validate(&timer)?;
        Ok(timer)
    }
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerChanges {
    pub execute_at: Option<DateTime<Utc>>,
    pub user_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
}

impl TimerChanges {
    pub fn execute_at(mut self, at: DateTime<Utc>) -> Self {
        self.execute_at = Some(at);
        self
    }

    pub fn user_id(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn category_id(mut self, category_id: Uuid) -> Self {
        self.category_id = Some(category_id);
        self
    }

    /// Apply to `current` and validate the result.
    pub fn apply(&self, current: &Timer) -> Result<Timer, ValidationError> {
        if current.is_deleted() {
            return Err(ValidationError::Deleted { id: current.id });
        }
        if current.is_processed() {
            return Err(ValidationError::Processed { id: current.id });
        }
        let mut next = current.clone();
        if let Some(at) = self.execute_at {
            next.execute_at = at;
        }
        if let Some(user_id) = self.user_id {
            next.user_id = Some(user_id);
        }
        if let Some(category_id) = self.category_id {
            next.category_id = Some(category_id);
        }
        validate(&next)?;
        Ok(next)
    }
}

/// True when a change between two versions of a timer invalidates its
/// scheduled job.
pub fn needs_reschedule(before: &Timer, after: &Timer) -> bool {
    before.execute_at != after.execute_at || before.user_id != after.user_id
}

fn validate(timer: &Timer) -> Result<(), ValidationError> {
    if timer.execute_at < timer.created_at {
        return Err(ValidationError::ExecuteAtBeforeCreation {
            execute_at: timer.execute_at,
            created_at: timer.created_at,
        });
    }
    if timer.kind.is_public() && timer.user_id.is_none() {
        return Err(ValidationError::Missing { field: "user_id" });
    }
    if timer.kind == TimerKind::PublishToCategory && timer.category_id.is_none() {
        return Err(ValidationError::Missing { field: "category_id" });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn close_at(at: DateTime<Utc>) -> NewTimer {
        NewTimer::new(Uuid::new_v4(), TimerKind::Close, at).by(Uuid::new_v4())
    }

    #[test]
    fn public_set_is_the_four_topic_actions() {
        let public: Vec<_> = TimerKind::ALL.iter().filter(|k| k.is_public()).collect();
        assert_eq!(
            public,
            vec![
                &TimerKind::Close,
                &TimerKind::Open,
                &TimerKind::Delete,
                &TimerKind::PublishToCategory
            ]
        );
        assert!(!TimerKind::Reminder.is_public());
        assert!(!TimerKind::Bump.is_public());
    }

    #[test]
    fn close_and_open_share_an_executor() {
        assert_eq!(TimerKind::Close.job_kind(), TimerKind::Open.job_kind());
        assert_eq!(TimerKind::Close.desired_open(), Some(false));
        assert_eq!(TimerKind::Open.desired_open(), Some(true));
        assert_eq!(TimerKind::Delete.desired_open(), None);
    }

    #[test]
    fn reminders_are_not_scheduled_here() {
        assert!(!TimerKind::Reminder.is_schedulable());
        assert!(TimerKind::Bump.is_schedulable());
        assert!(!TimerKind::schedulable_names().contains(&"reminder"));
    }

    #[test]
    fn kind_names_parse_back() {
        for kind in TimerKind::ALL {
            assert_eq!(kind.as_str().parse::<TimerKind>(), Ok(kind));
        }
        assert_eq!(
            "snooze".parse::<TimerKind>(),
            Err(UnknownTimerKind("snooze".into()))
        );
    }

    #[test]
    fn execute_at_equal_to_creation_is_valid() {
        let now = Utc::now();
        let timer = close_at(now).into_timer(Uuid::new_v4(), now).unwrap();
        assert_eq!(timer.execute_at, timer.created_at);
    }

    #[test]
    fn execute_at_before_creation_is_rejected() {
        let now = Utc::now();
        let err = close_at(now - Duration::seconds(1))
            .into_timer(Uuid::new_v4(), now)
            .unwrap_err();
        assert_eq!(err.field(), "execute_at");
    }

    #[test]
    fn missing_execute_at_is_rejected() {
        let mut attrs = close_at(Utc::now());
        attrs.execute_at = None;
        let err = attrs.into_timer(Uuid::new_v4(), Utc::now()).unwrap_err();
        assert_eq!(err, ValidationError::Missing { field: "execute_at" });
    }

    #[test]
    fn publish_requires_a_category() {
        let now = Utc::now();
        let attrs = NewTimer::new(Uuid::new_v4(), TimerKind::PublishToCategory, now).by(Uuid::new_v4());
        let err = attrs.clone().into_timer(Uuid::new_v4(), now).unwrap_err();
        assert_eq!(err.field(), "category_id");

        let timer = attrs
            .in_category(Uuid::new_v4())
            .into_timer(Uuid::new_v4(), now)
            .unwrap();
        assert!(timer.category_id.is_some());
    }

    #[test]
    fn public_kinds_need_a_scheduler() {
        let now = Utc::now();
        let err = NewTimer::new(Uuid::new_v4(), TimerKind::Open, now)
            .into_timer(Uuid::new_v4(), now)
            .unwrap_err();
        assert_eq!(err.field(), "user_id");

        // Private kinds do not.
        NewTimer::new(Uuid::new_v4(), TimerKind::Bump, now)
            .into_timer(Uuid::new_v4(), now)
            .unwrap();
    }

    #[test]
    fn overdue_timers_fire_now() {
        let now = Utc::now();
        let timer = close_at(now).into_timer(Uuid::new_v4(), now).unwrap();
        let later = now + Duration::minutes(5);
        assert_eq!(timer.fire_at(later), later);
        assert_eq!(timer.fire_at(now - Duration::minutes(5)), now);
    }

    #[test]
    fn only_schedule_fields_trigger_reschedule() {
        let now = Utc::now();
        let timer = NewTimer::new(Uuid::new_v4(), TimerKind::PublishToCategory, now)
            .by(Uuid::new_v4())
            .in_category(Uuid::new_v4())
            .into_timer(Uuid::new_v4(), now)
            .unwrap();

        let moved_category = TimerChanges::default().category_id(Uuid::new_v4()).apply(&timer).unwrap();
        assert!(!needs_reschedule(&timer, &moved_category));

        let later = TimerChanges::default().execute_at(now + Duration::hours(1)).apply(&timer).unwrap();
        assert!(needs_reschedule(&timer, &later));

        let other_user = TimerChanges::default().user_id(Uuid::new_v4()).apply(&timer).unwrap();
        assert!(needs_reschedule(&timer, &other_user));
    }

    #[test]
    fn changes_revalidate_against_original_creation() {
        let now = Utc::now();
        let timer = close_at(now + Duration::hours(1)).into_timer(Uuid::new_v4(), now).unwrap();
        let err = TimerChanges::default()
            .execute_at(now - Duration::hours(1))
            .apply(&timer)
            .unwrap_err();
        assert_eq!(err.field(), "execute_at");
    }

    #[test]
    fn deleted_timers_are_frozen() {
        let now = Utc::now();
        let mut timer = close_at(now).into_timer(Uuid::new_v4(), now).unwrap();
        timer.deleted_at = Some(now);
        let err = TimerChanges::default().execute_at(now).apply(&timer).unwrap_err();
        assert_eq!(err, ValidationError::Deleted { id: timer.id });
    }
}
