//! Query handlers for the Orders context.
//!
//! Two read paths: [`get_order_by_id`] replays the stream for a
//! fully consistent view, [`get_order_summary`] reads the projected row.

use serde::Serialize;
use strata_core::aggregate::AggregateRoot;
use strata_core::error::DomainError;
use strata_core::repository::Repository;
use uuid::Uuid;

use crate::application::read_model::{OrderSummary, OrderSummaryStore};
use crate::domain::aggregates::{Order, OrderLine, OrderStatus, order_stream};

/// Read-only view of an order aggregate.
#[derive(Debug, Serialize)]
pub struct OrderView {
    /// The order identifier.
    pub order_id: Uuid,
    /// The ordering customer.
    pub customer_id: Option<String>,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Opening total plus every line total.
    pub total: i64,
    /// Line items in the order they were added.
    pub lines: Vec<OrderLine>,
    /// Carrier tracking number, once shipped.
    pub tracking_number: Option<String>,
    /// Current version (event count).
    pub version: i64,
}

/// Retrieves an order by replaying its stream.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the order does not exist.
pub async fn get_order_by_id(
    order_id: Uuid,
    repo: &Repository<Order>,
) -> Result<OrderView, DomainError> {
    let order = repo.load(&order_stream(order_id)).await?;
    Ok(OrderView {
        order_id,
        customer_id: order.customer_id().map(str::to_owned),
        status: order.status(),
        total: order.total(),
        lines: order.lines().to_vec(),
        tracking_number: order.tracking_number().map(str::to_owned),
        version: order.version(),
    })
}

/// Retrieves the projected summary of an order. May lag the stream.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if no summary has been
/// projected for the order.
pub async fn get_order_summary(
    order_id: Uuid,
    store: &dyn OrderSummaryStore,
) -> Result<OrderSummary, DomainError> {
    store
        .get(order_id)
        .await?
        .ok_or_else(|| DomainError::AggregateNotFound(order_stream(order_id)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use strata_test_support::InMemoryEventStore;

    use super::*;
    use crate::application::command_handlers::{handle_add_item, handle_place_order};
    use crate::application::read_model::InMemoryOrderSummaryStore;
    use crate::domain::commands::{AddItem, PlaceOrder};

    #[tokio::test]
    async fn test_get_order_by_id_returns_view_with_lines() {
        // Arrange
        let repo: Repository<Order> = Repository::new(Arc::new(InMemoryEventStore::new()));
        let order_id = Uuid::new_v4();
        handle_place_order(
            &PlaceOrder {
                correlation_id: Uuid::new_v4(),
                order_id,
                customer_id: "cust-1".into(),
                total: 0,
                user_id: None,
            },
            &repo,
        )
        .await
        .unwrap();
        handle_add_item(
            &AddItem {
                correlation_id: Uuid::new_v4(),
                order_id,
                product_id: "sku-1".into(),
                quantity: 4,
                unit_price: 10,
            },
            &repo,
        )
        .await
        .unwrap();

        // Act
        let view = get_order_by_id(order_id, &repo).await.unwrap();

        // Assert
        assert_eq!(view.customer_id.as_deref(), Some("cust-1"));
        assert_eq!(view.status, OrderStatus::Placed);
        assert_eq!(view.total, 40);
        assert_eq!(view.lines.len(), 1);
        assert_eq!(view.version, 2);
    }

    #[tokio::test]
    async fn test_get_order_by_id_returns_not_found_for_unknown_order() {
        let repo: Repository<Order> = Repository::new(Arc::new(InMemoryEventStore::new()));

        let result = get_order_by_id(Uuid::new_v4(), &repo).await;

        assert!(matches!(result, Err(DomainError::AggregateNotFound(_))));
    }

    #[tokio::test]
    async fn test_get_order_summary_returns_not_found_before_projection() {
        let store = InMemoryOrderSummaryStore::new();

        let result = get_order_summary(Uuid::new_v4(), &store).await;

        assert!(matches!(result, Err(DomainError::AggregateNotFound(_))));
    }
}
