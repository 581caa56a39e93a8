//! Aggregate roots for the Orders context.

use std::fmt;

use serde::{Deserialize, Serialize};
use strata_core::aggregate::{AggregateRoot, Changes};
use strata_core::error::DomainError;
use strata_core::event::StreamId;
use uuid::Uuid;

use super::events::{
    OrderCancelled, OrderConfirmed, OrderEvent, OrderItemAdded, OrderPlaced, OrderShipped,
};

/// Lifecycle of an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Not placed yet; the stream is empty.
    #[default]
    Draft,
    /// Placed and accepting items.
    Placed,
    /// Confirmed for fulfilment.
    Confirmed,
    /// Handed to the carrier. Terminal.
    Shipped,
    /// Cancelled before shipping. Terminal.
    Cancelled,
}

impl OrderStatus {
    /// The lowercase wire name, e.g. `placed`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Placed => "placed",
            Self::Confirmed => "confirmed",
            Self::Shipped => "shipped",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a wire name produced by [`OrderStatus::as_str`].
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "placed" => Some(Self::Placed),
            "confirmed" => Some(Self::Confirmed),
            "shipped" => Some(Self::Shipped),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// The product identifier.
    pub product_id: String,
    /// Units ordered.
    pub quantity: i64,
    /// Price per unit in minor currency units.
    pub unit_price: i64,
}

/// Folded state, also the snapshot payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct OrderState {
    status: OrderStatus,
    customer_id: Option<String>,
    total: i64,
    lines: Vec<OrderLine>,
    tracking_number: Option<String>,
    cancellation_reason: Option<String>,
}

/// Returns the stream that holds `order_id`'s events.
#[must_use]
pub fn order_stream(order_id: Uuid) -> StreamId {
    StreamId::for_aggregate(Order::KIND, order_id)
}

/// Recovers the order id from an order stream name.
#[must_use]
pub fn order_id_from_stream(stream_id: &StreamId) -> Option<Uuid> {
    stream_id
        .as_str()
        .strip_prefix(Order::KIND)
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|id| Uuid::parse_str(id).ok())
}

/// The aggregate root for an order.
#[derive(Debug)]
pub struct Order {
    id: StreamId,
    state: OrderState,
    changes: Changes<OrderEvent>,
}

impl Order {
    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> OrderStatus {
        self.state.status
    }

    /// The ordering customer, once placed.
    #[must_use]
    pub fn customer_id(&self) -> Option<&str> {
        self.state.customer_id.as_deref()
    }

    /// Opening total plus every line total.
    #[must_use]
    pub fn total(&self) -> i64 {
        self.state.total
    }

    /// Line items in the order they were added.
    #[must_use]
    pub fn lines(&self) -> &[OrderLine] {
        &self.state.lines
    }

    /// Carrier tracking number, once shipped.
    #[must_use]
    pub fn tracking_number(&self) -> Option<&str> {
        self.state.tracking_number.as_deref()
    }

    /// Why the order was cancelled, if it was.
    #[must_use]
    pub fn cancellation_reason(&self) -> Option<&str> {
        self.state.cancellation_reason.as_deref()
    }

    /// Places the order, producing an `OrderPlaced` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order already exists, the
    /// customer is blank or the opening total is negative.
    pub fn place(&mut self, customer_id: &str, total: i64) -> Result<(), DomainError> {
        if self.state.status != OrderStatus::Draft {
            return Err(DomainError::Validation(format!(
                "order {} already exists",
                self.id
            )));
        }
        if customer_id.trim().is_empty() {
            return Err(DomainError::Validation("customer_id must not be empty".into()));
        }
        if total < 0 {
            return Err(DomainError::Validation(format!(
                "total must not be negative, got {total}"
            )));
        }
        self.record(OrderEvent::Placed(OrderPlaced {
            customer_id: customer_id.to_owned(),
            total,
        }));
        Ok(())
    }

    /// Adds a line item, producing an `OrderItemAdded` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` unless the order is `Placed`, the
    /// quantity is positive and the unit price is not negative.
    pub fn add_item(
        &mut self,
        product_id: &str,
        quantity: i64,
        unit_price: i64,
    ) -> Result<(), DomainError> {
        self.require(OrderStatus::Placed, "add items to")?;
        if product_id.trim().is_empty() {
            return Err(DomainError::Validation("product_id must not be empty".into()));
        }
        if quantity <= 0 {
            return Err(DomainError::Validation(format!(
                "quantity must be positive, got {quantity}"
            )));
        }
        if unit_price < 0 {
            return Err(DomainError::Validation(format!(
                "unit_price must not be negative, got {unit_price}"
            )));
        }
        self.record(OrderEvent::ItemAdded(OrderItemAdded {
            product_id: product_id.to_owned(),
            quantity,
            unit_price,
        }));
        Ok(())
    }

    /// Confirms the order, producing an `OrderConfirmed` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` unless the order is `Placed` with at
    /// least one line.
    pub fn confirm(&mut self) -> Result<(), DomainError> {
        self.require(OrderStatus::Placed, "confirm")?;
        if self.state.lines.is_empty() {
            return Err(DomainError::Validation(format!(
                "order {} has no items",
                self.id
            )));
        }
        self.record(OrderEvent::Confirmed(OrderConfirmed {}));
        Ok(())
    }

    /// Ships the order, producing an `OrderShipped` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` unless the order is `Confirmed` and
    /// the tracking number is not blank.
    pub fn ship(&mut self, tracking_number: &str) -> Result<(), DomainError> {
        self.require(OrderStatus::Confirmed, "ship")?;
        if tracking_number.trim().is_empty() {
            return Err(DomainError::Validation(
                "tracking_number must not be empty".into(),
            ));
        }
        self.record(OrderEvent::Shipped(OrderShipped {
            tracking_number: tracking_number.to_owned(),
        }));
        Ok(())
    }

    /// Cancels the order, producing an `OrderCancelled` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order was never placed, has
    /// shipped, or is already cancelled.
    pub fn cancel(&mut self, reason: &str) -> Result<(), DomainError> {
        match self.state.status {
            OrderStatus::Placed | OrderStatus::Confirmed => {}
            status => {
                return Err(DomainError::Validation(format!(
                    "cannot cancel order {} while {status}",
                    self.id
                )));
            }
        }
        self.record(OrderEvent::Cancelled(OrderCancelled {
            reason: reason.to_owned(),
        }));
        Ok(())
    }

    fn require(&self, status: OrderStatus, action: &str) -> Result<(), DomainError> {
        if self.state.status == status {
            Ok(())
        } else {
            Err(DomainError::Validation(format!(
                "cannot {action} order {} while {}",
                self.id, self.state.status
            )))
        }
    }
}

impl AggregateRoot for Order {
    type Event = OrderEvent;
    const KIND: &'static str = "Order";

    fn new(stream_id: StreamId) -> Self {
        Self {
            id: stream_id,
            state: OrderState::default(),
            changes: Changes::default(),
        }
    }

    fn stream_id(&self) -> &StreamId {
        &self.id
    }

    fn apply(&mut self, event: &OrderEvent) {
        let state = &mut self.state;
        match event {
            OrderEvent::Placed(e) => {
                state.status = OrderStatus::Placed;
                state.customer_id = Some(e.customer_id.clone());
                state.total = e.total;
            }
            OrderEvent::ItemAdded(e) => {
                state.total = state.total.saturating_add(e.line_total());
                state.lines.push(OrderLine {
                    product_id: e.product_id.clone(),
                    quantity: e.quantity,
                    unit_price: e.unit_price,
                });
            }
            OrderEvent::Confirmed(_) => state.status = OrderStatus::Confirmed,
            OrderEvent::Shipped(e) => {
                state.status = OrderStatus::Shipped;
                state.tracking_number = Some(e.tracking_number.clone());
            }
            OrderEvent::Cancelled(e) => {
                state.status = OrderStatus::Cancelled;
                state.cancellation_reason = Some(e.reason.clone());
            }
        }
    }

    fn changes(&self) -> &Changes<OrderEvent> {
        &self.changes
    }

    fn changes_mut(&mut self) -> &mut Changes<OrderEvent> {
        &mut self.changes
    }

    fn snapshot_state(&self) -> Result<Option<serde_json::Value>, DomainError> {
        Ok(Some(serde_json::to_value(&self.state)?))
    }

    fn restore_snapshot(&mut self, state: serde_json::Value) -> Result<(), DomainError> {
        self.state = serde_json::from_value(state)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placed_order() -> Order {
        let mut order = Order::new(order_stream(Uuid::new_v4()));
        order.place("cust-1", 500).unwrap();
        order
    }

    #[test]
    fn test_place_records_event_and_moves_to_placed() {
        // Arrange
        let mut order = Order::new(order_stream(Uuid::new_v4()));

        // Act
        order.place("cust-1", 500).unwrap();

        // Assert
        assert_eq!(order.status(), OrderStatus::Placed);
        assert_eq!(order.customer_id(), Some("cust-1"));
        assert_eq!(order.total(), 500);
        assert_eq!(order.uncommitted_events().len(), 1);
        assert_eq!(order.version(), 0);
    }

    #[test]
    fn test_place_twice_is_rejected() {
        let mut order = placed_order();

        let result = order.place("cust-2", 0);

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert_eq!(order.uncommitted_events().len(), 1);
    }

    #[test]
    fn test_add_item_accumulates_total() {
        // Arrange
        let mut order = placed_order();

        // Act
        order.add_item("sku-1", 2, 300).unwrap();
        order.add_item("sku-2", 1, 50).unwrap();

        // Assert
        assert_eq!(order.total(), 500 + 600 + 50);
        assert_eq!(order.lines().len(), 2);
        assert_eq!(order.next_version(), 4);
    }

    #[test]
    fn test_add_item_rejects_non_positive_quantity() {
        let mut order = placed_order();

        let result = order.add_item("sku-1", 0, 300);

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_add_item_before_placing_is_rejected() {
        let mut order = Order::new(order_stream(Uuid::new_v4()));

        let result = order.add_item("sku-1", 1, 100);

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert!(order.uncommitted_events().is_empty());
    }

    #[test]
    fn test_confirm_requires_items() {
        let mut order = placed_order();

        let result = order.confirm();

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert_eq!(order.status(), OrderStatus::Placed);
    }

    #[test]
    fn test_full_lifecycle_reaches_shipped() {
        // Arrange
        let mut order = placed_order();
        order.add_item("sku-1", 1, 100).unwrap();

        // Act
        order.confirm().unwrap();
        order.ship("TRACK-1").unwrap();

        // Assert
        assert_eq!(order.status(), OrderStatus::Shipped);
        assert_eq!(order.tracking_number(), Some("TRACK-1"));
    }

    #[test]
    fn test_ship_requires_confirmation() {
        let mut order = placed_order();
        order.add_item("sku-1", 1, 100).unwrap();

        let result = order.ship("TRACK-1");

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_cancel_allowed_until_shipped() {
        let mut placed = placed_order();
        placed.cancel("changed mind").unwrap();
        assert_eq!(placed.status(), OrderStatus::Cancelled);
        assert_eq!(placed.cancellation_reason(), Some("changed mind"));

        let mut shipped = placed_order();
        shipped.add_item("sku-1", 1, 100).unwrap();
        shipped.confirm().unwrap();
        shipped.ship("TRACK-1").unwrap();
        let result = shipped.cancel("too late");
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_cancel_twice_is_rejected() {
        let mut order = placed_order();
        order.cancel("first").unwrap();

        let result = order.cancel("second");

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_snapshot_restores_identical_state() {
        // Arrange
        let mut order = placed_order();
        order.add_item("sku-1", 3, 10).unwrap();
        order.confirm().unwrap();
        let state = order.snapshot_state().unwrap().unwrap();

        // Act
        let mut restored = Order::new(order.stream_id().clone());
        restored.restore_snapshot(state).unwrap();

        // Assert
        assert_eq!(restored.state, order.state);
    }

    #[test]
    fn test_order_id_round_trips_through_stream_name() {
        let order_id = Uuid::new_v4();

        let stream = order_stream(order_id);

        assert_eq!(stream.as_str(), format!("Order-{order_id}"));
        assert_eq!(order_id_from_stream(&stream), Some(order_id));
        assert_eq!(order_id_from_stream(&StreamId::new("Ledger-1")), None);
    }

    #[test]
    fn test_status_wire_names_parse_back() {
        for status in [
            OrderStatus::Draft,
            OrderStatus::Placed,
            OrderStatus::Confirmed,
            OrderStatus::Shipped,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("lost"), None);
    }
}
