//! Commands for the Orders context.

use uuid::Uuid;

/// Command to place a new order.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: Uuid,
    /// The ordering customer.
    pub customer_id: String,
    /// Opening total in minor currency units.
    pub total: i64,
    /// The acting user, when known.
    pub user_id: Option<String>,
}

/// Command to add a line item to a placed order.
#[derive(Debug, Clone)]
pub struct AddItem {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: Uuid,
    /// The product identifier.
    pub product_id: String,
    /// Units ordered.
    pub quantity: i64,
    /// Price per unit in minor currency units.
    pub unit_price: i64,
}

/// Command to confirm an order.
#[derive(Debug, Clone)]
pub struct ConfirmOrder {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: Uuid,
}

/// Command to ship a confirmed order.
#[derive(Debug, Clone)]
pub struct ShipOrder {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: Uuid,
    /// Carrier tracking number.
    pub tracking_number: String,
}

/// Command to cancel an order that has not shipped.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: Uuid,
    /// Why the order is being cancelled.
    pub reason: String,
}
