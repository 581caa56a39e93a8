//! Integration tests for the per-projector endpoints.

mod common;

use axum::http::StatusCode;
use strata_orders::application::read_model::OrderSummaryStore;

#[tokio::test]
async fn test_rebuild_replays_every_order_event() {
    // Arrange
    let worker = common::build_test_worker();
    let order_id = worker.place_order(3).await;
    worker.services.projections.run_until_idle().await.unwrap();

    // Act
    let (status, json) =
        common::post(worker.router(), "/projections/order_summary/rebuild").await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["projector"], "order_summary");
    assert_eq!(json["applied"], 4);
    let summary = worker.summaries.get(order_id).await.unwrap().unwrap();
    assert_eq!(summary.item_count, 3);
}

#[tokio::test]
async fn test_failed_lists_nothing_for_a_healthy_projector() {
    let worker = common::build_test_worker();

    let (status, json) = common::get_json(worker.router(), "/projections/order_summary/failed").await;

    assert_eq!(status, StatusCode::OK);
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_projector_returns_404() {
    let worker = common::build_test_worker();

    let (status, json) = common::post(worker.router(), "/projections/nope/rebuild").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "projector_not_found");
}
