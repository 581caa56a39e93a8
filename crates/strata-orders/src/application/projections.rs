//! Projection that keeps [`OrderSummary`] rows current.

use std::sync::Arc;

use async_trait::async_trait;
use strata_core::event::{DomainEvent, EventRecord};
use strata_core::projection::{HandlerError, Projector};
use tracing::debug;

use crate::application::read_model::{OrderSummary, OrderSummaryStore};
use crate::domain::aggregates::{OrderStatus, order_id_from_stream};
use crate::domain::events::{ORDER_EVENT_TYPES, OrderEvent};

/// Checkpoint key of the order summary projection.
pub const ORDER_SUMMARY_PROJECTOR: &str = "order_summary";

/// Folds order events into [`OrderSummary`] rows.
///
/// Rows are keyed by order id and remember the stream version they were
/// built from. Redelivered events (version at or below `last_version`) are
/// ignored; an event arriving ahead of its predecessor fails so the retry
/// sweep can replay it once the gap is filled.
pub struct OrderSummaryProjector {
    store: Arc<dyn OrderSummaryStore>,
}

impl OrderSummaryProjector {
    /// Creates a projector writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn OrderSummaryStore>) -> Self {
        Self { store }
    }

    fn fold(summary: &mut OrderSummary, event: &OrderEvent) {
        match event {
            OrderEvent::Placed(_) => {}
            OrderEvent::ItemAdded(e) => {
                summary.total = summary.total.saturating_add(e.line_total());
                summary.item_count = summary.item_count.saturating_add(e.quantity);
            }
            OrderEvent::Confirmed(_) => summary.status = OrderStatus::Confirmed,
            OrderEvent::Shipped(e) => {
                summary.status = OrderStatus::Shipped;
                summary.tracking_number = Some(e.tracking_number.clone());
            }
            OrderEvent::Cancelled(_) => summary.status = OrderStatus::Cancelled,
        }
    }
}

#[async_trait]
impl Projector for OrderSummaryProjector {
    fn name(&self) -> &'static str {
        ORDER_SUMMARY_PROJECTOR
    }

    fn subscribed_types(&self) -> &[&'static str] {
        &ORDER_EVENT_TYPES
    }

    async fn handle(&self, record: &EventRecord) -> Result<(), HandlerError> {
        let order_id = order_id_from_stream(&record.stream_id).ok_or_else(|| {
            HandlerError::new(format!("{} is not an order stream", record.stream_id))
        })?;
        let event = OrderEvent::registry().decode_record(record)?;
        let existing = self.store.get(order_id).await?;

        let summary = match (existing, &event) {
            (Some(summary), _) if record.version <= summary.last_version => {
                debug!(%order_id, version = record.version, "already projected");
                return Ok(());
            }
            (None, OrderEvent::Placed(placed)) => OrderSummary {
                order_id,
                customer_id: placed.customer_id.clone(),
                status: OrderStatus::Placed,
                total: placed.total,
                item_count: 0,
                tracking_number: None,
                last_version: record.version,
                updated_at: record.occurred_at,
            },
            (Some(mut summary), _) if record.version == summary.last_version + 1 => {
                Self::fold(&mut summary, &event);
                summary.last_version = record.version;
                summary.updated_at = record.occurred_at;
                summary
            }
            (Some(summary), _) => {
                return Err(HandlerError::new(format!(
                    "order {order_id} summary is at version {}, cannot apply version {}",
                    summary.last_version, record.version
                )));
            }
            (None, _) => {
                return Err(HandlerError::new(format!(
                    "order {order_id} has no summary yet for version {}",
                    record.version
                )));
            }
        };

        self.store.upsert(summary).await?;
        Ok(())
    }

    async fn reset(&self) -> Result<(), HandlerError> {
        self.store.clear().await?;
        Ok(())
    }
}
