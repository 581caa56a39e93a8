//! `PostgreSQL` implementation of the `EventStore` trait.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use strata_core::error::DomainError;
use strata_core::event::{EventRecord, NewEvent, StreamId};
use strata_core::store::{EventStore, OutboxPolicy, check_expected_version};
use tracing::{instrument, warn};

use crate::rows::{db_error, event_from_row, events_from_rows, is_unique_violation};

/// PostgreSQL-backed event store.
///
/// Appends take a transaction-scoped advisory lock on the stream, read the
/// current version, insert the events (and, if asked, their outbox rows) and
/// commit. The `(stream_id, version)` unique constraint backs the version
/// check for writers that bypass the lock.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_events(
        tx: &mut Transaction<'_, Postgres>,
        stream_id: &StreamId,
        events: Vec<NewEvent>,
        expected_version: i64,
    ) -> Result<Vec<EventRecord>, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO events (stream_id, version, event_type, data, metadata) ",
        );
        let mut version = expected_version;
        qb.push_values(events, |mut b, event| {
            version += 1;
            b.push_bind(stream_id.as_str());
            b.push_bind(version);
            b.push_bind(event.event_type);
            b.push_bind(event.data);
            b.push_bind(Json(event.metadata));
        });
        qb.push(" RETURNING id, stream_id, version, event_type, data, metadata, occurred_at");

        let rows = qb.build().fetch_all(&mut **tx).await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn insert_outbox(
        tx: &mut Transaction<'_, Postgres>,
        records: &[EventRecord],
    ) -> Result<(), sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO outbox (aggregate_id, event_id, version, event_type, payload, metadata, created_at) ",
        );
        qb.push_values(records, |mut b, record| {
            b.push_bind(record.stream_id.as_str());
            b.push_bind(record.id);
            b.push_bind(record.version);
            b.push_bind(record.event_type.as_str());
            b.push_bind(&record.data);
            b.push_bind(Json(&record.metadata));
            b.push_bind(record.occurred_at);
        });
        qb.build().execute(&mut **tx).await?;
        Ok(())
    }

    async fn conflict(&self, stream_id: &StreamId, expected: i64) -> DomainError {
        match self.stream_version(stream_id).await {
            Ok(actual) => DomainError::ConcurrencyConflict {
                stream_id: stream_id.clone(),
                expected,
                actual,
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    #[instrument(skip(self, events), fields(stream_id = %stream_id, count = events.len()))]
    async fn append_batch_with(
        &self,
        stream_id: &StreamId,
        events: Vec<NewEvent>,
        expected_version: i64,
        outbox: OutboxPolicy,
    ) -> Result<Vec<EventRecord>, DomainError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(stream_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        let actual: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM events WHERE stream_id = $1")
                .bind(stream_id.as_str())
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error)?;
        check_expected_version(stream_id, expected_version, actual)?;

        let records = match Self::insert_events(&mut tx, stream_id, events, expected_version).await
        {
            Ok(records) => records,
            Err(e) if is_unique_violation(&e) => {
                drop(tx);
                warn!("unique violation on append, reporting as conflict");
                return Err(self.conflict(stream_id, expected_version).await);
            }
            Err(e) => return Err(db_error(e)),
        };

        if outbox == OutboxPolicy::Enqueue {
            Self::insert_outbox(&mut tx, &records)
                .await
                .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(records)
    }

    async fn read_stream(
        &self,
        stream_id: &StreamId,
        from_version: i64,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let rows = sqlx::query(
            r"
            SELECT id, stream_id, version, event_type, data, metadata, occurred_at
            FROM events
            WHERE stream_id = $1 AND version > $2
            ORDER BY version
            ",
        )
        .bind(stream_id.as_str())
        .bind(from_version)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        events_from_rows(&rows)
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<i64, DomainError> {
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM events WHERE stream_id = $1")
            .bind(stream_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)
    }

    /// Global reads only return rows whose writing transaction is older than
    /// every transaction still in flight, so an id allocated early but
    /// committed late is never stepped over by a cursor.
    async fn read_all(&self, from_id: i64, limit: i64) -> Result<Vec<EventRecord>, DomainError> {
        let rows = sqlx::query(
            r"
            SELECT id, stream_id, version, event_type, data, metadata, occurred_at
            FROM events
            WHERE id > $1
              AND transaction_id < pg_snapshot_xmin(pg_current_snapshot())
            ORDER BY id
            LIMIT $2
            ",
        )
        .bind(from_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        events_from_rows(&rows)
    }

    async fn read_by_type(
        &self,
        event_type: &str,
        limit: i64,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let rows = sqlx::query(
            r"
            SELECT id, stream_id, version, event_type, data, metadata, occurred_at
            FROM events
            WHERE event_type = $1
            ORDER BY id
            LIMIT $2
            ",
        )
        .bind(event_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        events_from_rows(&rows)
    }

    async fn read_event(&self, id: i64) -> Result<Option<EventRecord>, DomainError> {
        let row = sqlx::query(
            r"
            SELECT id, stream_id, version, event_type, data, metadata, occurred_at
            FROM events
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref()
            .map(event_from_row)
            .transpose()
            .map_err(db_error)
    }
}
