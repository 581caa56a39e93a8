//! Integration tests for `PgCheckpointStore` driven by the projection manager.

use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, TimeDelta, Utc};
use sqlx::PgPool;
use strata_core::clock::SystemClock;
use strata_core::event::{NewEvent, StreamId};
use strata_core::projection::{
    CheckpointStore, ProjectionConfig, ProjectionErrorRecord, ProjectionManager,
};
use strata_core::store::EventStore;
use strata_event_store::{PgCheckpointStore, PgEventStore};
use strata_test_support::{ManualClock, RecordingProjector};

async fn seed(store: &PgEventStore, count: i64) {
    let id = StreamId::new("Order-1");
    let start = store.stream_version(&id).await.unwrap();
    for n in start..start + count {
        store
            .append(&id, NewEvent::new("ItemAdded", serde_json::json!({ "n": n })), n)
            .await
            .unwrap();
    }
}

/// Fails the test instead of hanging when a row lock is never released.
async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(std::time::Duration::from_secs(10), future)
        .await
        .expect("timed out waiting on postgres")
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_advance_is_monotonic(pool: PgPool) {
    let checkpoints = PgCheckpointStore::new(pool);

    checkpoints.advance("summary", 10, Utc::now()).await.unwrap();
    checkpoints.advance("summary", 3, Utc::now()).await.unwrap();

    assert_eq!(checkpoints.position("summary").await.unwrap(), 10);
    assert_eq!(checkpoints.positions().await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_claims_skip_locked_rows(pool: PgPool) {
    let store = PgEventStore::new(pool.clone());
    seed(&store, 4).await;
    let checkpoints = PgCheckpointStore::new(pool);

    let first = checkpoints.claim_batch(0, 2).await.unwrap();
    let second = checkpoints.claim_batch(0, 10).await.unwrap();

    let first_ids: Vec<i64> = first.events().iter().map(|e| e.id).collect();
    let second_ids: Vec<i64> = second.events().iter().map(|e| e.id).collect();
    assert_eq!(first_ids.len(), 2);
    assert_eq!(second_ids.len(), 2);
    assert!(first_ids.iter().all(|id| !second_ids.contains(id)));
    first.release().await.unwrap();
    second.release().await.unwrap();
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_error_rows_upsert_and_become_due(pool: PgPool) {
    let store = PgEventStore::new(pool.clone());
    seed(&store, 1).await;
    let event_id = store.read_all(0, 1).await.unwrap()[0].id;
    let checkpoints = PgCheckpointStore::new(pool);
    let now = Utc::now();
    let record = |retry_count: i32| ProjectionErrorRecord {
        projector_name: "summary".into(),
        event_id,
        event_type: "ItemAdded".into(),
        retry_count,
        next_retry_at: now + Duration::minutes(1),
        last_error_at: now,
        error_message: "boom".into(),
    };

    checkpoints.record_error(record(1)).await.unwrap();
    checkpoints.record_error(record(2)).await.unwrap();

    let found = checkpoints.find_error("summary", event_id).await.unwrap().unwrap();
    assert_eq!(found.retry_count, 2);
    assert!(checkpoints.due_errors(now, 5, 10).await.unwrap().is_empty());
    assert_eq!(
        checkpoints
            .due_errors(now + Duration::minutes(2), 5, 10)
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        checkpoints.errored_event_ids("summary", 0, event_id).await.unwrap(),
        vec![event_id]
    );
    checkpoints.clear_error("summary", event_id).await.unwrap();
    assert!(checkpoints.find_error("summary", event_id).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_manager_isolates_failures_against_postgres(pool: PgPool) {
    // Arrange
    let store = PgEventStore::new(pool.clone());
    seed(&store, 5).await;
    let ids: Vec<i64> = store.read_all(0, 10).await.unwrap().iter().map(|e| e.id).collect();
    let flaky = Arc::new(RecordingProjector::new("flaky").failing_on(ids[2]));
    let steady = Arc::new(RecordingProjector::new("steady"));
    let checkpoints = Arc::new(PgCheckpointStore::new(pool));
    let manager = ProjectionManager::new(
        Arc::new(store),
        checkpoints.clone(),
        vec![flaky.clone(), steady.clone()],
        Arc::new(SystemClock),
        ProjectionConfig::default(),
    )
    .unwrap();

    // Act
    within(manager.run_until_idle()).await.unwrap();

    // Assert
    assert_eq!(steady.handled(), ids);
    assert_eq!(flaky.handled().len(), 4);
    let error = checkpoints.find_error("flaky", ids[2]).await.unwrap().unwrap();
    assert_eq!(error.retry_count, 1);
    assert_eq!(checkpoints.position("steady").await.unwrap(), ids[4]);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_error_can_be_recorded_while_its_event_is_claimed(pool: PgPool) {
    // Arrange
    let store = PgEventStore::new(pool.clone());
    seed(&store, 2).await;
    let checkpoints = PgCheckpointStore::new(pool);
    let claim = checkpoints.claim_batch(0, 10).await.unwrap();
    let event = claim.events()[0].clone();
    let now = Utc::now();

    // Act
    within(checkpoints.record_error(ProjectionErrorRecord {
        projector_name: "summary".into(),
        event_id: event.id,
        event_type: event.event_type.clone(),
        retry_count: 1,
        next_retry_at: now + Duration::minutes(1),
        last_error_at: now,
        error_message: "boom".into(),
    }))
    .await
    .unwrap();
    claim.release().await.unwrap();

    // Assert
    let found = checkpoints.find_error("summary", event.id).await.unwrap();
    assert_eq!(found.map(|e| e.retry_count), Some(1));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_retry_sweep_runs_alongside_projection_batch(pool: PgPool) {
    // Arrange
    let store = PgEventStore::new(pool.clone());
    seed(&store, 5).await;
    let first: Vec<i64> = store.read_all(0, 10).await.unwrap().iter().map(|e| e.id).collect();
    let flaky = Arc::new(RecordingProjector::new("flaky").failing_on(first[1]));
    let checkpoints = Arc::new(PgCheckpointStore::new(pool));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let manager = ProjectionManager::new(
        Arc::new(store.clone()),
        checkpoints.clone(),
        vec![flaky.clone()],
        clock.clone(),
        ProjectionConfig::default(),
    )
    .unwrap();
    within(manager.run_until_idle()).await.unwrap();
    flaky.heal(first[1]);
    clock.advance(TimeDelta::minutes(2));
    seed(&store, 3).await;
    let all: Vec<i64> = store.read_all(0, 20).await.unwrap().iter().map(|e| e.id).collect();

    // Act
    let (batch, sweep) = within(async {
        tokio::join!(manager.run_until_idle(), manager.retry_failed())
    })
    .await;

    // Assert
    assert_eq!(batch.unwrap(), 3);
    assert_eq!(sweep.unwrap().recovered, 1);
    let mut handled = flaky.handled();
    assert_eq!(handled.iter().filter(|id| **id == first[1]).count(), 1);
    handled.sort_unstable();
    assert_eq!(handled, all);
    assert!(checkpoints.find_error("flaky", first[1]).await.unwrap().is_none());
    assert_eq!(checkpoints.position("flaky").await.unwrap(), all[7]);
}
