//! Row decoding shared by the adapters.

use sqlx::Row;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use strata_core::error::DomainError;
use strata_core::event::{EventMetadata, EventRecord, StreamId};
use strata_core::outbox::OutboxEntry;
use strata_core::projection::ProjectionErrorRecord;

pub(crate) fn db_error(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(err.to_string())
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub(crate) fn event_from_row(row: &PgRow) -> Result<EventRecord, sqlx::Error> {
    Ok(EventRecord {
        id: row.try_get("id")?,
        stream_id: StreamId::new(row.try_get::<String, _>("stream_id")?),
        version: row.try_get("version")?,
        event_type: row.try_get("event_type")?,
        data: row.try_get("data")?,
        metadata: row.try_get::<Json<EventMetadata>, _>("metadata")?.0,
        occurred_at: row.try_get("occurred_at")?,
    })
}

pub(crate) fn events_from_rows(rows: &[PgRow]) -> Result<Vec<EventRecord>, DomainError> {
    rows.iter()
        .map(event_from_row)
        .collect::<Result<_, _>>()
        .map_err(db_error)
}

pub(crate) fn outbox_from_row(row: &PgRow) -> Result<OutboxEntry, sqlx::Error> {
    Ok(OutboxEntry {
        id: row.try_get("id")?,
        aggregate_id: StreamId::new(row.try_get::<String, _>("aggregate_id")?),
        event_id: row.try_get("event_id")?,
        version: row.try_get("version")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        metadata: row.try_get::<Json<EventMetadata>, _>("metadata")?.0,
        created_at: row.try_get("created_at")?,
        published: row.try_get("published")?,
        published_at: row.try_get("published_at")?,
        retry_count: row.try_get("retry_count")?,
        dead_lettered: row.try_get("dead_lettered")?,
        last_error: row.try_get("last_error")?,
    })
}

pub(crate) fn outbox_from_rows(rows: &[PgRow]) -> Result<Vec<OutboxEntry>, DomainError> {
    rows.iter()
        .map(outbox_from_row)
        .collect::<Result<_, _>>()
        .map_err(db_error)
}

pub(crate) fn error_from_row(row: &PgRow) -> Result<ProjectionErrorRecord, sqlx::Error> {
    Ok(ProjectionErrorRecord {
        projector_name: row.try_get("projector_name")?,
        event_id: row.try_get("event_id")?,
        event_type: row.try_get("event_type")?,
        retry_count: row.try_get("retry_count")?,
        next_retry_at: row.try_get("next_retry_at")?,
        last_error_at: row.try_get("last_error_at")?,
        error_message: row.try_get("error_message")?,
    })
}

pub(crate) fn errors_from_rows(rows: &[PgRow]) -> Result<Vec<ProjectionErrorRecord>, DomainError> {
    rows.iter()
        .map(error_from_row)
        .collect::<Result<_, _>>()
        .map_err(db_error)
}
