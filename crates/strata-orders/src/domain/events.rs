//! Domain events for the Orders context.

use serde::{Deserialize, Serialize};
use strata_core::error::DomainError;
use strata_core::event::{DomainEvent, EventRegistry};

/// Event type constant for [`OrderPlaced`].
pub const ORDER_PLACED_EVENT_TYPE: &str = "OrderPlaced";
/// Event type constant for [`OrderItemAdded`].
pub const ORDER_ITEM_ADDED_EVENT_TYPE: &str = "OrderItemAdded";
/// Event type constant for [`OrderConfirmed`].
pub const ORDER_CONFIRMED_EVENT_TYPE: &str = "OrderConfirmed";
/// Event type constant for [`OrderShipped`].
pub const ORDER_SHIPPED_EVENT_TYPE: &str = "OrderShipped";
/// Event type constant for [`OrderCancelled`].
pub const ORDER_CANCELLED_EVENT_TYPE: &str = "OrderCancelled";

/// Every discriminator the Orders context writes.
pub const ORDER_EVENT_TYPES: [&str; 5] = [
    ORDER_PLACED_EVENT_TYPE,
    ORDER_ITEM_ADDED_EVENT_TYPE,
    ORDER_CONFIRMED_EVENT_TYPE,
    ORDER_SHIPPED_EVENT_TYPE,
    ORDER_CANCELLED_EVENT_TYPE,
];

/// Emitted when a customer places an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    /// The ordering customer.
    pub customer_id: String,
    /// Opening total in minor currency units, before any items.
    pub total: i64,
}

/// Emitted when a line item is added to a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemAdded {
    /// The product identifier.
    pub product_id: String,
    /// Units ordered.
    pub quantity: i64,
    /// Price per unit in minor currency units.
    pub unit_price: i64,
}

impl OrderItemAdded {
    /// Line total (`quantity * unit_price`), saturating on overflow.
    #[must_use]
    pub fn line_total(&self) -> i64 {
        self.quantity.saturating_mul(self.unit_price)
    }
}

/// Emitted when an order is confirmed for fulfilment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {}

/// Emitted when an order leaves the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipped {
    /// Carrier tracking number.
    pub tracking_number: String,
}

/// Emitted when an order is cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    /// Why the order was cancelled.
    pub reason: String,
}

/// Event payload variants for the Orders context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    /// The order was placed.
    Placed(OrderPlaced),
    /// A line item was added.
    ItemAdded(OrderItemAdded),
    /// The order was confirmed.
    Confirmed(OrderConfirmed),
    /// The order was shipped.
    Shipped(OrderShipped),
    /// The order was cancelled.
    Cancelled(OrderCancelled),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Placed(_) => ORDER_PLACED_EVENT_TYPE,
            Self::ItemAdded(_) => ORDER_ITEM_ADDED_EVENT_TYPE,
            Self::Confirmed(_) => ORDER_CONFIRMED_EVENT_TYPE,
            Self::Shipped(_) => ORDER_SHIPPED_EVENT_TYPE,
            Self::Cancelled(_) => ORDER_CANCELLED_EVENT_TYPE,
        }
    }

    fn to_payload(&self) -> Result<serde_json::Value, DomainError> {
        let payload = match self {
            Self::Placed(e) => serde_json::to_value(e),
            Self::ItemAdded(e) => serde_json::to_value(e),
            Self::Confirmed(e) => serde_json::to_value(e),
            Self::Shipped(e) => serde_json::to_value(e),
            Self::Cancelled(e) => serde_json::to_value(e),
        };
        Ok(payload?)
    }

    fn registry() -> EventRegistry<Self> {
        EventRegistry::new()
            .with(ORDER_PLACED_EVENT_TYPE, |v| {
                serde_json::from_value(v).map(Self::Placed)
            })
            .with(ORDER_ITEM_ADDED_EVENT_TYPE, |v| {
                serde_json::from_value(v).map(Self::ItemAdded)
            })
            .with(ORDER_CONFIRMED_EVENT_TYPE, |v| {
                serde_json::from_value(v).map(Self::Confirmed)
            })
            .with(ORDER_SHIPPED_EVENT_TYPE, |v| {
                serde_json::from_value(v).map(Self::Shipped)
            })
            .with(ORDER_CANCELLED_EVENT_TYPE, |v| {
                serde_json::from_value(v).map(Self::Cancelled)
            })
    }
}
