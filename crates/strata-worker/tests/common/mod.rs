//! Shared helpers for worker HTTP tests, backed by in-memory adapters.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use strata_core::outbox::MessagePublisher;
use strata_orders::application::command_handlers::{handle_add_item, handle_place_order};
use strata_orders::application::read_model::InMemoryOrderSummaryStore;
use strata_orders::domain::commands::{AddItem, PlaceOrder};
use strata_test_support::{InMemoryEventStore, InMemorySnapshotStore, RecordingPublisher};
use strata_worker::config::WorkerConfig;
use strata_worker::routes;
use strata_worker::services::{Adapters, Services};
use strata_worker::state::AppState;
use tower::ServiceExt;
use uuid::Uuid;

/// A worker wired to in-memory adapters.
pub struct TestWorker {
    pub store: InMemoryEventStore,
    pub summaries: InMemoryOrderSummaryStore,
    pub services: Arc<Services>,
}

impl TestWorker {
    pub fn router(&self) -> Router {
        routes::router(AppState::new(Arc::clone(&self.services)))
    }

    /// Places an order with `items` single-unit lines.
    pub async fn place_order(&self, items: i64) -> Uuid {
        let order_id = Uuid::new_v4();
        handle_place_order(
            &PlaceOrder {
                correlation_id: Uuid::new_v4(),
                order_id,
                customer_id: "cust-1".into(),
                total: 0,
                user_id: None,
            },
            &self.services.orders,
        )
        .await
        .unwrap();
        for n in 0..items {
            handle_add_item(
                &AddItem {
                    correlation_id: Uuid::new_v4(),
                    order_id,
                    product_id: format!("sku-{n}"),
                    quantity: 1,
                    unit_price: 100,
                },
                &self.services.orders,
            )
            .await
            .unwrap();
        }
        order_id
    }
}

pub fn test_config() -> WorkerConfig {
    WorkerConfig::from_lookup(|key| match key {
        "DATABASE_URL" => Some("postgres://unused".to_owned()),
        "OUTBOX_MAX_RETRIES" => Some("1".to_owned()),
        _ => None,
    })
    .unwrap()
}

pub fn build_test_worker() -> TestWorker {
    build_test_worker_with(Arc::new(RecordingPublisher::new()))
}

pub fn build_test_worker_with(publisher: Arc<dyn MessagePublisher>) -> TestWorker {
    let store = InMemoryEventStore::new();
    let summaries = InMemoryOrderSummaryStore::new();
    let adapters = Adapters {
        event_store: Arc::new(store.clone()),
        snapshots: Arc::new(InMemorySnapshotStore::new()),
        checkpoints: Arc::new(store.checkpoints()),
        outbox: Arc::new(store.outbox()),
        order_summaries: Arc::new(summaries.clone()),
    };
    let services = Services::new(
        adapters,
        publisher,
        Arc::new(strata_core::clock::SystemClock),
        &test_config(),
    )
    .unwrap();
    TestWorker {
        store,
        summaries,
        services: Arc::new(services),
    }
}

/// Send a request and return the status and the JSON body (`Null` if empty).
pub async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };

    (status, json)
}

pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, "GET", uri).await
}

pub async fn post(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, "POST", uri).await
}
