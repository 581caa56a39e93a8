//! Integration tests for the status endpoint.

mod common;

use axum::http::StatusCode;
use strata_orders::application::projections::ORDER_SUMMARY_PROJECTOR;

#[tokio::test]
async fn test_status_before_any_work_reports_zeroes() {
    // Arrange
    let worker = common::build_test_worker();

    // Act
    let (status, json) = common::get_json(worker.router(), "/status").await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    let projections = json["projections"].as_array().unwrap();
    assert_eq!(projections.len(), 1);
    assert_eq!(projections[0]["name"], ORDER_SUMMARY_PROJECTOR);
    assert_eq!(projections[0]["last_event_id"], 0);
    assert!(projections[0]["last_processed_at"].is_null());
    assert_eq!(json["outbox"]["total"], 0);
}

#[tokio::test]
async fn test_status_reflects_projection_and_relay_progress() {
    // Arrange
    let worker = common::build_test_worker();
    worker.place_order(2).await;
    worker.place_order(1).await;
    worker.services.projections.run_until_idle().await.unwrap();
    worker.services.relay.publish_once().await.unwrap();
    worker.place_order(0).await;

    // Act
    let (status, json) = common::get_json(worker.router(), "/status").await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    let projection = &json["projections"][0];
    assert_eq!(projection["last_event_id"], 5);
    assert!(projection["last_processed_at"].is_string());
    assert_eq!(projection["exhausted_errors"], 0);
    assert_eq!(json["outbox"]["total"], 6);
    assert_eq!(json["outbox"]["published"], 5);
    assert_eq!(json["outbox"]["pending"], 1);
    assert_eq!(json["outbox"]["dead_lettered"], 0);
}
