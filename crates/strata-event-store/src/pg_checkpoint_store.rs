//! `PostgreSQL` implementation of the `CheckpointStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use strata_core::error::DomainError;
use strata_core::event::EventRecord;
use strata_core::projection::{
    CheckpointStore, ClaimedBatch, ProjectionErrorRecord, ProjectionPosition,
};

use crate::rows::{db_error, error_from_row, errors_from_rows, events_from_rows};

/// Projection positions and errors in `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    /// Creates a new `PgCheckpointStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Events locked `FOR NO KEY UPDATE SKIP LOCKED` by an open transaction.
///
/// The weaker row lock still partitions concurrent claims, and leaves the
/// foreign-key `KEY SHARE` check of a `projection_errors` insert on another
/// connection free to proceed while the claim is held.
struct PgClaim {
    tx: Transaction<'static, Postgres>,
    events: Vec<EventRecord>,
}

#[async_trait]
impl ClaimedBatch for PgClaim {
    fn events(&self) -> &[EventRecord] {
        &self.events
    }

    async fn release(self: Box<Self>) -> Result<(), DomainError> {
        self.tx.commit().await.map_err(db_error)
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn claim_batch(
        &self,
        after_id: i64,
        limit: i64,
    ) -> Result<Box<dyn ClaimedBatch>, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let rows = sqlx::query(
            r"
            SELECT id, stream_id, version, event_type, data, metadata, occurred_at
            FROM events
            WHERE id > $1
              AND transaction_id < pg_snapshot_xmin(pg_current_snapshot())
            ORDER BY id
            LIMIT $2
            FOR NO KEY UPDATE SKIP LOCKED
            ",
        )
        .bind(after_id)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error)?;
        let events = events_from_rows(&rows)?;
        Ok(Box::new(PgClaim { tx, events }))
    }

    async fn position(&self, projector: &str) -> Result<i64, DomainError> {
        let position: Option<i64> = sqlx::query_scalar(
            "SELECT last_event_id FROM projection_positions WHERE projector_name = $1",
        )
        .bind(projector)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(position.unwrap_or(0))
    }

    async fn positions(&self) -> Result<Vec<ProjectionPosition>, DomainError> {
        let rows = sqlx::query(
            r"
            SELECT projector_name, last_event_id, last_processed_at
            FROM projection_positions
            ORDER BY projector_name
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                Ok(ProjectionPosition {
                    projector_name: row.try_get("projector_name")?,
                    last_event_id: row.try_get("last_event_id")?,
                    last_processed_at: row.try_get("last_processed_at")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(db_error)
    }

    async fn advance(
        &self,
        projector: &str,
        event_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r"
            INSERT INTO projection_positions (projector_name, last_event_id, last_processed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (projector_name) DO UPDATE
            SET last_event_id = GREATEST(projection_positions.last_event_id, EXCLUDED.last_event_id),
                last_processed_at = EXCLUDED.last_processed_at
            ",
        )
        .bind(projector)
        .bind(event_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn reset(&self, projector: &str) -> Result<(), DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        sqlx::query("DELETE FROM projection_errors WHERE projector_name = $1")
            .bind(projector)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        sqlx::query("DELETE FROM projection_positions WHERE projector_name = $1")
            .bind(projector)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)
    }

    async fn record_error(&self, record: ProjectionErrorRecord) -> Result<(), DomainError> {
        sqlx::query(
            r"
            INSERT INTO projection_errors
                (projector_name, event_id, event_type, retry_count, next_retry_at, last_error_at, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (projector_name, event_id) DO UPDATE
            SET event_type = EXCLUDED.event_type,
                retry_count = EXCLUDED.retry_count,
                next_retry_at = EXCLUDED.next_retry_at,
                last_error_at = EXCLUDED.last_error_at,
                error_message = EXCLUDED.error_message
            ",
        )
        .bind(&record.projector_name)
        .bind(record.event_id)
        .bind(&record.event_type)
        .bind(record.retry_count)
        .bind(record.next_retry_at)
        .bind(record.last_error_at)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn find_error(
        &self,
        projector: &str,
        event_id: i64,
    ) -> Result<Option<ProjectionErrorRecord>, DomainError> {
        let row = sqlx::query(
            r"
            SELECT projector_name, event_id, event_type, retry_count, next_retry_at, last_error_at, error_message
            FROM projection_errors
            WHERE projector_name = $1 AND event_id = $2
            ",
        )
        .bind(projector)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref()
            .map(error_from_row)
            .transpose()
            .map_err(db_error)
    }

    async fn clear_error(&self, projector: &str, event_id: i64) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM projection_errors WHERE projector_name = $1 AND event_id = $2")
            .bind(projector)
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn errored_event_ids(
        &self,
        projector: &str,
        after_id: i64,
        up_to_id: i64,
    ) -> Result<Vec<i64>, DomainError> {
        sqlx::query_scalar(
            r"
            SELECT event_id FROM projection_errors
            WHERE projector_name = $1 AND event_id > $2 AND event_id <= $3
            ",
        )
        .bind(projector)
        .bind(after_id)
        .bind(up_to_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn due_errors(
        &self,
        now: DateTime<Utc>,
        max_retries: i32,
        limit: i64,
    ) -> Result<Vec<ProjectionErrorRecord>, DomainError> {
        let rows = sqlx::query(
            r"
            SELECT projector_name, event_id, event_type, retry_count, next_retry_at, last_error_at, error_message
            FROM projection_errors
            WHERE next_retry_at <= $1 AND retry_count < $2
            ORDER BY next_retry_at, event_id
            LIMIT $3
            ",
        )
        .bind(now)
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        errors_from_rows(&rows)
    }

    async fn exhausted_errors(
        &self,
        max_retries: i32,
    ) -> Result<Vec<ProjectionErrorRecord>, DomainError> {
        let rows = sqlx::query(
            r"
            SELECT projector_name, event_id, event_type, retry_count, next_retry_at, last_error_at, error_message
            FROM projection_errors
            WHERE retry_count >= $1
            ORDER BY projector_name, event_id
            ",
        )
        .bind(max_retries)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        errors_from_rows(&rows)
    }
}
