//! `PostgreSQL` implementation of the `OutboxStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use strata_core::error::DomainError;
use strata_core::event::StreamId;
use strata_core::outbox::{OutboxBatch, OutboxEntry, OutboxStats, OutboxStore};

use crate::rows::{db_error, outbox_from_rows};

/// Outbox rows in `PostgreSQL`, written by [`PgEventStore`](crate::PgEventStore)
/// in the append transaction.
#[derive(Debug, Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    /// Creates a new `PgOutboxStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Rows locked by an open transaction. Status updates go through the same
/// transaction; dropping the batch without committing rolls them back.
struct PgOutboxBatch {
    tx: Transaction<'static, Postgres>,
    entries: Vec<OutboxEntry>,
}

#[async_trait]
impl OutboxBatch for PgOutboxBatch {
    fn entries(&self) -> &[OutboxEntry] {
        &self.entries
    }

    async fn mark_published(&mut self, id: i64, at: DateTime<Utc>) -> Result<(), DomainError> {
        sqlx::query("UPDATE outbox SET published = TRUE, published_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn record_failure(
        &mut self,
        id: i64,
        error: &str,
        dead_letter: bool,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r"
            UPDATE outbox
            SET retry_count = retry_count + 1,
                last_error = $2,
                dead_lettered = $3
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(error)
        .bind(dead_letter)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        self.tx.commit().await.map_err(db_error)
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn claim_unpublished(&self, limit: i64) -> Result<Box<dyn OutboxBatch>, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let rows = sqlx::query(
            r"
            SELECT id, aggregate_id, event_id, version, event_type, payload, metadata, created_at,
                   published, published_at, retry_count, dead_lettered, last_error
            FROM outbox
            WHERE NOT published AND NOT dead_lettered
            ORDER BY aggregate_id, id
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error)?;
        let entries = outbox_from_rows(&rows)?;
        Ok(Box::new(PgOutboxBatch { tx, entries }))
    }

    async fn fetch_by_aggregate(
        &self,
        aggregate_id: &StreamId,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, DomainError> {
        let rows = sqlx::query(
            r"
            SELECT id, aggregate_id, event_id, version, event_type, payload, metadata, created_at,
                   published, published_at, retry_count, dead_lettered, last_error
            FROM outbox
            WHERE aggregate_id = $1
            ORDER BY id
            LIMIT $2
            ",
        )
        .bind(aggregate_id.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        outbox_from_rows(&rows)
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<OutboxEntry>, DomainError> {
        let rows = sqlx::query(
            r"
            SELECT id, aggregate_id, event_id, version, event_type, payload, metadata, created_at,
                   published, published_at, retry_count, dead_lettered, last_error
            FROM outbox
            WHERE dead_lettered
            ORDER BY id
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        outbox_from_rows(&rows)
    }

    async fn requeue(&self, id: i64) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r"
            UPDATE outbox
            SET dead_lettered = FALSE, retry_count = 0
            WHERE id = $1 AND dead_lettered
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_published(&self, older_than: DateTime<Utc>) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM outbox WHERE published AND published_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<OutboxStats, DomainError> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE NOT published AND NOT dead_lettered) AS pending,
                   COUNT(*) FILTER (WHERE published) AS published,
                   COUNT(*) FILTER (WHERE dead_lettered AND NOT published) AS dead_lettered,
                   COALESCE(MAX(retry_count) FILTER (WHERE NOT published), 0) AS max_retry_count
            FROM outbox
            ",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        let stats = || -> Result<OutboxStats, sqlx::Error> {
            Ok(OutboxStats {
                total: row.try_get("total")?,
                pending: row.try_get("pending")?,
                published: row.try_get("published")?,
                dead_lettered: row.try_get("dead_lettered")?,
                max_retry_count: row.try_get("max_retry_count")?,
            })
        };
        stats().map_err(db_error)
    }
}
