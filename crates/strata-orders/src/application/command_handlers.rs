//! Command handlers for the Orders context.
//!
//! Each handler loads the order through the repository, runs one domain
//! method and saves the resulting events. Repositories handed to these
//! functions are expected to be built with
//! [`Repository::with_outbox`], so every saved event is also staged for the
//! relay.

use strata_core::aggregate::AggregateRoot;
use strata_core::error::DomainError;
use strata_core::event::{EventMetadata, EventRecord};
use strata_core::repository::Repository;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::aggregates::{Order, order_stream};
use crate::domain::commands::{AddItem, CancelOrder, ConfirmOrder, PlaceOrder, ShipOrder};

/// Result of a successfully handled command.
#[derive(Debug)]
pub struct OrderCommandResult {
    /// The order affected by the command.
    pub order_id: Uuid,
    /// The order's stream version after the save.
    pub version: i64,
    /// The events persisted by the command.
    pub stored_events: Vec<EventRecord>,
}

/// Loads an existing order, applies `command`, and saves.
async fn execute<F>(
    order_id: Uuid,
    metadata: &EventMetadata,
    repo: &Repository<Order>,
    command: F,
) -> Result<OrderCommandResult, DomainError>
where
    F: FnOnce(&mut Order) -> Result<(), DomainError>,
{
    let mut order = repo.load(&order_stream(order_id)).await?;
    command(&mut order)?;
    let stored_events = repo.save(&mut order, metadata).await?;
    Ok(OrderCommandResult {
        order_id,
        version: order.version(),
        stored_events,
    })
}

/// Handles the `PlaceOrder` command. The order stream must not exist yet.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the order already exists or the
/// command is invalid, and `DomainError::ConcurrencyConflict` if another
/// writer placed the same order first.
#[instrument(skip_all, fields(order_id = %command.order_id))]
pub async fn handle_place_order(
    command: &PlaceOrder,
    repo: &Repository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    let mut metadata = EventMetadata::for_command(command.correlation_id);
    metadata.user_id.clone_from(&command.user_id);

    let mut order = repo.load_or_new(&order_stream(command.order_id)).await?;
    order.place(&command.customer_id, command.total)?;
    let stored_events = repo.save(&mut order, &metadata).await?;

    info!(customer_id = %command.customer_id, "order placed");
    Ok(OrderCommandResult {
        order_id: command.order_id,
        version: order.version(),
        stored_events,
    })
}

/// Handles the `AddItem` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the order does not exist,
/// `DomainError::Validation` if the order no longer accepts items, and
/// propagates store failures.
#[instrument(skip_all, fields(order_id = %command.order_id))]
pub async fn handle_add_item(
    command: &AddItem,
    repo: &Repository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    execute(
        command.order_id,
        &EventMetadata::for_command(command.correlation_id),
        repo,
        |order| order.add_item(&command.product_id, command.quantity, command.unit_price),
    )
    .await
}

/// Handles the `ConfirmOrder` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the order does not exist and
/// `DomainError::Validation` if it cannot be confirmed.
#[instrument(skip_all, fields(order_id = %command.order_id))]
pub async fn handle_confirm_order(
    command: &ConfirmOrder,
    repo: &Repository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    execute(
        command.order_id,
        &EventMetadata::for_command(command.correlation_id),
        repo,
        Order::confirm,
    )
    .await
}

/// Handles the `ShipOrder` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the order does not exist and
/// `DomainError::Validation` if it is not confirmed.
#[instrument(skip_all, fields(order_id = %command.order_id))]
pub async fn handle_ship_order(
    command: &ShipOrder,
    repo: &Repository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    execute(
        command.order_id,
        &EventMetadata::for_command(command.correlation_id),
        repo,
        |order| order.ship(&command.tracking_number),
    )
    .await
}

/// Handles the `CancelOrder` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the order does not exist and
/// `DomainError::Validation` if it has shipped or is already cancelled.
#[instrument(skip_all, fields(order_id = %command.order_id))]
pub async fn handle_cancel_order(
    command: &CancelOrder,
    repo: &Repository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    execute(
        command.order_id,
        &EventMetadata::for_command(command.correlation_id),
        repo,
        |order| order.cancel(&command.reason),
    )
    .await
}
