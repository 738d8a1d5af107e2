//! [`TopicProvider`] over a PostgreSQL `topics` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use lapse_core::TopicSnapshot;

use super::TopicProvider;
use crate::error::TopicError;

#[derive(Debug, sqlx::FromRow)]
struct TopicRow {
    id: Uuid,
    closed: bool,
    deleted_at: Option<DateTime<Utc>>,
    category_id: Option<Uuid>,
    bumped_at: Option<DateTime<Utc>>,
}

impl From<TopicRow> for TopicSnapshot {
    fn from(row: TopicRow) -> Self {
        Self {
            id: row.id,
            closed: row.closed,
            deleted: row.deleted_at.is_some(),
            category_id: row.category_id,
            bumped_at: row.bumped_at,
        }
    }
}

pub struct PgTopicProvider {
    pool: PgPool,
}

impl PgTopicProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run a single-row update, reporting a missing row as `NotFound`.
    async fn execute(
        &self,
        id: Uuid,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<(), TopicError> {
        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(TopicError::NotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl TopicProvider for PgTopicProvider {
    async fn get(&self, id: Uuid) -> Result<Option<TopicSnapshot>, TopicError> {
        let row = sqlx::query_as::<_, TopicRow>(
            "SELECT id, closed, deleted_at, category_id, bumped_at FROM topics WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TopicSnapshot::from))
    }

    async fn set_open_state(&self, id: Uuid, open: bool) -> Result<(), TopicError> {
        let query = sqlx::query("UPDATE topics SET closed = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(!open);
        self.execute(id, query).await
    }

    async fn publish_to_category(&self, id: Uuid, category_id: Uuid) -> Result<(), TopicError> {
        let query = sqlx::query(
            "UPDATE topics SET category_id = $2, bumped_at = now(), updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(category_id);
        self.execute(id, query).await
    }

    async fn mark_deleted(&self, id: Uuid) -> Result<(), TopicError> {
        let query = sqlx::query(
            "UPDATE topics SET deleted_at = COALESCE(deleted_at, now()), updated_at = now() WHERE id = $1",
        )
        .bind(id);
        self.execute(id, query).await
    }

    async fn bump(&self, id: Uuid) -> Result<(), TopicError> {
        let query = sqlx::query("UPDATE topics SET bumped_at = now(), updated_at = now() WHERE id = $1")
            .bind(id);
        self.execute(id, query).await
    }
}
