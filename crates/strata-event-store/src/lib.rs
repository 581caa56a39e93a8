//! `PostgreSQL` adapters for the Strata persistence engine.
//!
//! Every adapter takes a [`PgPool`](sqlx::PgPool); they are meant to share
//! one pool over one database so that an append and its outbox rows commit
//! in the same transaction.

pub mod pg_checkpoint_store;
pub mod pg_event_store;
pub mod pg_outbox_store;
pub mod pg_snapshot_store;
mod rows;

use sqlx::PgPool;
use sqlx::migrate::{MigrateError, Migrator};

pub use pg_checkpoint_store::PgCheckpointStore;
pub use pg_event_store::PgEventStore;
pub use pg_outbox_store::PgOutboxStore;
pub use pg_snapshot_store::PgSnapshotStore;

/// Schema migrations for the engine tables.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Applies pending migrations.
///
/// # Errors
///
/// Returns a `MigrateError` if a migration fails or the recorded history
/// diverges from the bundled migrations.
#[tracing::instrument(skip_all)]
pub async fn migrate(pool: &PgPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}
