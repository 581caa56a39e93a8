//! `PostgreSQL` implementation of the `SnapshotStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use strata_core::error::DomainError;
use strata_core::event::StreamId;
use strata_core::snapshot::{Snapshot, SnapshotStore};

use crate::rows::db_error;

/// Snapshots in `PostgreSQL`, one row per stream.
#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    /// Creates a new `PgSnapshotStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn snapshot_from_row(row: &PgRow) -> Result<Snapshot, sqlx::Error> {
    Ok(Snapshot {
        stream_id: StreamId::new(row.try_get::<String, _>("stream_id")?),
        version: row.try_get("version")?,
        state: row.try_get("state")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    /// Upserts the row. An older snapshot never replaces a newer one.
    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        sqlx::query(
            r"
            INSERT INTO snapshots (stream_id, version, state, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (stream_id) DO UPDATE
            SET version = EXCLUDED.version,
                state = EXCLUDED.state,
                created_at = EXCLUDED.created_at
            WHERE snapshots.version <= EXCLUDED.version
            ",
        )
        .bind(snapshot.stream_id.as_str())
        .bind(snapshot.version)
        .bind(&snapshot.state)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn find(&self, stream_id: &StreamId) -> Result<Option<Snapshot>, DomainError> {
        let row = sqlx::query(
            "SELECT stream_id, version, state, created_at FROM snapshots WHERE stream_id = $1",
        )
        .bind(stream_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref()
            .map(snapshot_from_row)
            .transpose()
            .map_err(db_error)
    }

    async fn delete(&self, stream_id: &StreamId) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM snapshots WHERE stream_id = $1")
            .bind(stream_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Snapshot>, DomainError> {
        let rows = sqlx::query(
            "SELECT stream_id, version, state, created_at FROM snapshots ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter()
            .map(snapshot_from_row)
            .collect::<Result<_, _>>()
            .map_err(db_error)
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM snapshots WHERE created_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}
