//! PostgreSQL-backed [`TimerStore`] over the `topic_timers` table.
//!
//! The one-public-timer rule lives in the partial unique index
//! `topic_timers_one_public_per_topic`; a violation (23505) is reported as
//! [`StoreError::DuplicatePublicTimer`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use lapse_core::{Timer, TimerKind};

use super::TimerStore;
use crate::error::StoreError;

const COLUMNS: &str = "id, topic_id, kind, execute_at, created_at, user_id, category_id, deleted_at, processed_at";

/// Raw `topic_timers` row.
#[derive(Debug, sqlx::FromRow)]
struct TimerRow {
    id: Uuid,
    topic_id: Uuid,
    kind: String,
    execute_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    user_id: Option<Uuid>,
    category_id: Option<Uuid>,
    deleted_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TimerRow> for Timer {
    type Error = StoreError;

    fn try_from(row: TimerRow) -> Result<Self, Self::Error> {
        Ok(Timer {
            id: row.id,
            target_id: row.topic_id,
            kind: row.kind.parse::<TimerKind>()?,
            execute_at: row.execute_at,
            created_at: row.created_at,
            user_id: row.user_id,
            category_id: row.category_id,
            deleted_at: row.deleted_at,
            processed_at: row.processed_at,
        })
    }
}

fn decode_all(rows: Vec<TimerRow>) -> Result<Vec<Timer>, StoreError> {
    rows.into_iter().map(Timer::try_from).collect()
}

fn decode_opt(row: Option<TimerRow>) -> Result<Option<Timer>, StoreError> {
    row.map(Timer::try_from).transpose()
}

fn names(kinds: Vec<&'static str>) -> Vec<String> {
    kinds.into_iter().map(String::from).collect()
}

pub struct PgTimerStore {
    pool: PgPool,
}

impl PgTimerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TimerStore for PgTimerStore {
    async fn insert(&self, timer: &Timer) -> Result<Timer, StoreError> {
        let result = sqlx::query_as::<_, TimerRow>(&format!(
            "INSERT INTO topic_timers
                (id, topic_id, kind, execute_at, created_at, user_id, category_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {COLUMNS}"
        ))
        .bind(timer.id)
        .bind(timer.target_id)
        .bind(timer.kind.as_str())
        .bind(timer.execute_at)
        .bind(timer.created_at)
        .bind(timer.user_id)
        .bind(timer.category_id)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => row.try_into(),
            Err(e) => Err(map_unique_violation(e, timer.target_id)),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Timer>, StoreError> {
        let row = sqlx::query_as::<_, TimerRow>(&format!(
            "SELECT {COLUMNS} FROM topic_timers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        decode_opt(row)
    }

    async fn update_schedule(&self, timer: &Timer) -> Result<Option<Timer>, StoreError> {
        let row = sqlx::query_as::<_, TimerRow>(&format!(
            "UPDATE topic_timers SET
                execute_at = $2,
                user_id = $3,
                category_id = $4
             WHERE id = $1
               AND deleted_at IS NULL
               AND processed_at IS NULL
             RETURNING {COLUMNS}"
        ))
        .bind(timer.id)
        .bind(timer.execute_at)
        .bind(timer.user_id)
        .bind(timer.category_id)
        .fetch_optional(&self.pool)
        .await?;

        decode_opt(row)
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Timer>, StoreError> {
        let row = sqlx::query_as::<_, TimerRow>(&format!(
            "UPDATE topic_timers SET deleted_at = COALESCE(deleted_at, $2)
             WHERE id = $1
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        decode_opt(row)
    }

    async fn mark_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE topic_timers SET processed_at = $2
             WHERE id = $1 AND processed_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn active_public_for_target(&self, target_id: Uuid) -> Result<Option<Timer>, StoreError> {
        let row = sqlx::query_as::<_, TimerRow>(&format!(
            "SELECT {COLUMNS} FROM topic_timers
             WHERE topic_id = $1
               AND deleted_at IS NULL
               AND processed_at IS NULL
               AND kind = ANY($2)"
        ))
        .bind(target_id)
        .bind(names(TimerKind::public_names()))
        .fetch_optional(&self.pool)
        .await?;

        decode_opt(row)
    }

    async fn for_target(&self, target_id: Uuid) -> Result<Vec<Timer>, StoreError> {
        let rows = sqlx::query_as::<_, TimerRow>(&format!(
            "SELECT {COLUMNS} FROM topic_timers
             WHERE topic_id = $1
             ORDER BY created_at"
        ))
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;

        decode_all(rows)
    }

    async fn due_unprocessed(&self, now: DateTime<Utc>) -> Result<Vec<Timer>, StoreError> {
        let rows = sqlx::query_as::<_, TimerRow>(&format!(
            "SELECT {COLUMNS} FROM topic_timers
             WHERE deleted_at IS NULL
               AND processed_at IS NULL
               AND execute_at <= $1
               AND kind = ANY($2)
             ORDER BY execute_at, created_at"
        ))
        .bind(now)
        .bind(names(TimerKind::schedulable_names()))
        .fetch_all(&self.pool)
        .await?;

        decode_all(rows)
    }

    async fn pending_unprocessed(&self) -> Result<Vec<Timer>, StoreError> {
        let rows = sqlx::query_as::<_, TimerRow>(&format!(
            "SELECT {COLUMNS} FROM topic_timers
             WHERE deleted_at IS NULL
               AND processed_at IS NULL
               AND kind = ANY($1)
             ORDER BY execute_at, created_at"
        ))
        .bind(names(TimerKind::schedulable_names()))
        .fetch_all(&self.pool)
        .await?;

        decode_all(rows)
    }
}

/// Map a PostgreSQL unique violation (23505) to [`StoreError::DuplicatePublicTimer`].
fn map_unique_violation(e: sqlx::Error, target_id: Uuid) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::DuplicatePublicTimer { target_id };
        }
    }
    error!(topic_id = %target_id, "timer store database error: {}", e);
    StoreError::Database(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: &str) -> TimerRow {
        let now = Utc::now();
        TimerRow {
            id: Uuid::new_v4(),
            topic_id: Uuid::new_v4(),
            kind: kind.to_string(),
            execute_at: now,
            created_at: now,
            user_id: Some(Uuid::new_v4()),
            category_id: None,
            deleted_at: None,
            processed_at: None,
        }
    }

    #[test]
    fn rows_decode_into_timers() {
        let r = row("publish_to_category");
        let topic_id = r.topic_id;
        let timer = Timer::try_from(r).unwrap();
        assert_eq!(timer.kind, TimerKind::PublishToCategory);
        assert_eq!(timer.target_id, topic_id);
    }

    #[test]
    fn unknown_kind_is_a_decode_error() {
        let err = Timer::try_from(row("snooze")).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
        assert!(err.to_string().contains("snooze"));
    }

    #[test]
    fn non_database_errors_are_not_duplicates() {
        let err = map_unique_violation(sqlx::Error::RowNotFound, Uuid::new_v4());
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn migration_public_kinds_match_enum() {
        // Keep in sync with topic_timers_one_public_per_topic.
        assert_eq!(
            TimerKind::public_names(),
            vec!["close", "open", "delete", "publish_to_category"]
        );
    }
}
