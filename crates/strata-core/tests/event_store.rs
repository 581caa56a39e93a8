mod common;

use serde_json::json;
use strata_core::error::DomainError;
use strata_core::event::{EventMetadata, NewEvent, StreamId};
use strata_core::outbox::OutboxStore;
use strata_core::store::{EventStore, OutboxPolicy};
use strata_test_support::InMemoryEventStore;
use uuid::Uuid;

use common::payload;

fn deposited(amount: i64) -> NewEvent {
    NewEvent::new("Deposited", payload(amount))
}

#[tokio::test]
async fn test_second_writer_at_same_version_conflicts() {
    // Arrange
    let store = InMemoryEventStore::new();
    let stream = StreamId::new("Order-1");
    store
        .append(&stream, NewEvent::new("OrderCreated", json!({})), 0)
        .await
        .unwrap();

    // Act
    let err = store
        .append(&stream, NewEvent::new("OrderCreated", json!({})), 0)
        .await
        .unwrap_err();

    // Assert
    match err {
        DomainError::ConcurrencyConflict {
            stream_id,
            expected,
            actual,
        } => {
            assert_eq!(stream_id, stream);
            assert_eq!(expected, 0);
            assert_eq!(actual, 1);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
    assert_eq!(store.stream_version(&stream).await.unwrap(), 1);
}

#[tokio::test]
async fn test_batch_append_assigns_consecutive_versions_and_increasing_ids() {
    // Arrange
    let store = InMemoryEventStore::new();
    let stream = StreamId::new("Order-7");

    // Act
    let records = store
        .append_batch(&stream, vec![deposited(1), deposited(2), deposited(3)], 0)
        .await
        .unwrap();

    // Assert
    let versions: Vec<i64> = records.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    assert!(records.windows(2).all(|w| w[0].id < w[1].id));
    assert_eq!(store.stream_version(&stream).await.unwrap(), 3);
}

#[tokio::test]
async fn test_conflicting_batch_writes_nothing() {
    let store = InMemoryEventStore::new();
    let stream = StreamId::new("Order-7");
    store.append(&stream, deposited(1), 0).await.unwrap();

    let result = store
        .append_batch(&stream, vec![deposited(2), deposited(3)], 0)
        .await;

    assert!(result.unwrap_err().is_concurrency_conflict());
    assert_eq!(store.read_stream(&stream, 0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_batch_is_a_no_op() {
    let store = InMemoryEventStore::new();
    let stream = StreamId::new("Order-7");

    let records = store.append_batch(&stream, Vec::new(), 0).await.unwrap();

    assert!(records.is_empty());
    assert!(!store.stream_exists(&stream).await.unwrap());
}

#[tokio::test]
async fn test_read_stream_returns_events_after_version() {
    let store = InMemoryEventStore::new();
    let stream = StreamId::new("Order-7");
    store
        .append_batch(&stream, vec![deposited(1), deposited(2), deposited(3)], 0)
        .await
        .unwrap();

    let tail = store.read_stream(&stream, 1).await.unwrap();

    assert_eq!(tail.iter().map(|r| r.version).collect::<Vec<_>>(), vec![2, 3]);
    assert_eq!(tail[0].data, payload(2));
}

#[tokio::test]
async fn test_read_all_interleaves_streams_in_id_order() {
    let store = InMemoryEventStore::new();
    let a = StreamId::new("Order-1");
    let b = StreamId::new("Order-2");
    store.append(&a, deposited(1), 0).await.unwrap();
    store.append(&b, deposited(2), 0).await.unwrap();
    store.append(&a, deposited(3), 1).await.unwrap();

    let page = store.read_all(0, 2).await.unwrap();
    let rest = store.read_all(page[1].id, 10).await.unwrap();

    assert_eq!(page.iter().map(|r| r.stream_id.as_str()).collect::<Vec<_>>(), vec!["Order-1", "Order-2"]);
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].version, 2);
}

#[tokio::test]
async fn test_read_by_type_and_read_event() {
    let store = InMemoryEventStore::new();
    let stream = StreamId::new("Order-1");
    store
        .append_batch(
            &stream,
            vec![NewEvent::new("OrderCreated", json!({})), deposited(5)],
            0,
        )
        .await
        .unwrap();

    let deposits = store.read_by_type("Deposited", 10).await.unwrap();
    let first = store.read_event(1).await.unwrap();
    let missing = store.read_event(99).await.unwrap();

    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[0].version, 2);
    assert_eq!(first.unwrap().event_type, "OrderCreated");
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_metadata_is_returned_verbatim() {
    let store = InMemoryEventStore::new();
    let stream = StreamId::new("Order-1");
    let correlation = Uuid::new_v4();
    let mut metadata = EventMetadata::for_command(correlation).with_user("alice");
    metadata.extra.insert("source".into(), json!("api"));

    store
        .append(&stream, deposited(1).with_metadata(metadata.clone()), 0)
        .await
        .unwrap();

    let stored = store.read_stream(&stream, 0).await.unwrap();
    assert_eq!(stored[0].metadata, metadata);
}

#[tokio::test]
async fn test_enqueue_policy_stages_one_outbox_entry_per_event() {
    // Arrange
    let store = InMemoryEventStore::new();
    let stream = StreamId::new("Order-1");

    // Act
    let records = store
        .append_batch_with(&stream, vec![deposited(1), deposited(2)], 0, OutboxPolicy::Enqueue)
        .await
        .unwrap();

    // Assert
    let entries = store.outbox().fetch_by_aggregate(&stream, 10).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].event_id, records[0].id);
    assert_eq!(entries[1].version, 2);
    assert!(entries.iter().all(|e| !e.published && e.retry_count == 0));
}

#[tokio::test]
async fn test_rejected_append_stages_no_outbox_entries() {
    let store = InMemoryEventStore::new();
    let stream = StreamId::new("Order-1");
    store.append(&stream, deposited(1), 0).await.unwrap();

    let result = store
        .append_batch_with(&stream, vec![deposited(2)], 0, OutboxPolicy::Enqueue)
        .await;

    assert!(result.is_err());
    assert_eq!(store.outbox().stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_concurrent_writers_exactly_one_wins() {
    let store = InMemoryEventStore::new();
    let stream = StreamId::new("Order-1");

    let mut handles = Vec::new();
    for n in 0..8 {
        let store = store.clone();
        let stream = stream.clone();
        handles.push(tokio::spawn(async move {
            store.append(&stream, deposited(n), 0).await
        }));
    }
    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert!(e.is_concurrency_conflict()),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(store.stream_version(&stream).await.unwrap(), 1);
}
