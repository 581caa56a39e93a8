//! The order summary read model and its storage port.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use strata_core::error::DomainError;
use uuid::Uuid;

use crate::domain::aggregates::OrderStatus;

/// Denormalized, query-optimized view of one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    /// The order identifier.
    pub order_id: Uuid,
    /// The ordering customer.
    pub customer_id: String,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Opening total plus every line total.
    pub total: i64,
    /// Units across all lines.
    pub item_count: i64,
    /// Carrier tracking number, once shipped.
    pub tracking_number: Option<String>,
    /// Stream version of the last event folded in.
    pub last_version: i64,
    /// Time of the last event folded in.
    pub updated_at: DateTime<Utc>,
}

/// Storage port for [`OrderSummary`] rows.
#[async_trait]
pub trait OrderSummaryStore: Send + Sync {
    /// Looks up one summary.
    async fn get(&self, order_id: Uuid) -> Result<Option<OrderSummary>, DomainError>;

    /// Inserts or replaces the summary for `summary.order_id`.
    async fn upsert(&self, summary: OrderSummary) -> Result<(), DomainError>;

    /// Summaries for one customer, most recently updated first.
    async fn by_customer(&self, customer_id: &str) -> Result<Vec<OrderSummary>, DomainError>;

    /// Removes every summary.
    async fn clear(&self) -> Result<(), DomainError>;
}

/// Summaries held in a process-local map.
#[derive(Debug, Default, Clone)]
pub struct InMemoryOrderSummaryStore {
    rows: Arc<Mutex<HashMap<Uuid, OrderSummary>>>,
}

impl InMemoryOrderSummaryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, OrderSummary>>, DomainError> {
        self.rows
            .lock()
            .map_err(|_| DomainError::Infrastructure("order summary lock poisoned".into()))
    }
}

#[async_trait]
impl OrderSummaryStore for InMemoryOrderSummaryStore {
    async fn get(&self, order_id: Uuid) -> Result<Option<OrderSummary>, DomainError> {
        Ok(self.rows()?.get(&order_id).cloned())
    }

    async fn upsert(&self, summary: OrderSummary) -> Result<(), DomainError> {
        self.rows()?.insert(summary.order_id, summary);
        Ok(())
    }

    async fn by_customer(&self, customer_id: &str) -> Result<Vec<OrderSummary>, DomainError> {
        let mut summaries: Vec<OrderSummary> = self
            .rows()?
            .values()
            .filter(|s| s.customer_id == customer_id)
            .cloned()
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn clear(&self) -> Result<(), DomainError> {
        self.rows()?.clear();
        Ok(())
    }
}
