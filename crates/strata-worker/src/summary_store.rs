//! `PostgreSQL` implementation of the `OrderSummaryStore` port.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use strata_core::error::DomainError;
use strata_orders::application::read_model::{OrderSummary, OrderSummaryStore};
use strata_orders::domain::aggregates::OrderStatus;
use uuid::Uuid;

/// Order summaries in the `order_summaries` table.
#[derive(Debug, Clone)]
pub struct PgOrderSummaryStore {
    pool: PgPool,
}

impl PgOrderSummaryStore {
    /// Creates a new `PgOrderSummaryStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_error(e: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(e.to_string())
}

fn summary_from_row(row: &PgRow) -> Result<OrderSummary, DomainError> {
    let order_id: String = row.try_get("order_id").map_err(db_error)?;
    let status: String = row.try_get("status").map_err(db_error)?;
    Ok(OrderSummary {
        order_id: Uuid::parse_str(&order_id)
            .map_err(|e| DomainError::Serialization(format!("bad order_id {order_id}: {e}")))?,
        customer_id: row.try_get("customer_id").map_err(db_error)?,
        status: OrderStatus::parse(&status)
            .ok_or_else(|| DomainError::Serialization(format!("bad order status {status}")))?,
        total: row.try_get("total").map_err(db_error)?,
        item_count: row.try_get("item_count").map_err(db_error)?,
        tracking_number: row.try_get("tracking_number").map_err(db_error)?,
        last_version: row.try_get("last_version").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
    })
}

#[async_trait]
impl OrderSummaryStore for PgOrderSummaryStore {
    async fn get(&self, order_id: Uuid) -> Result<Option<OrderSummary>, DomainError> {
        let row = sqlx::query(
            r"
            SELECT order_id, customer_id, status, total, item_count, tracking_number,
                   last_version, updated_at
            FROM order_summaries
            WHERE order_id = $1
            ",
        )
        .bind(order_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(summary_from_row).transpose()
    }

    /// Upserts the row, never replacing a newer version with an older one.
    async fn upsert(&self, summary: OrderSummary) -> Result<(), DomainError> {
        sqlx::query(
            r"
            INSERT INTO order_summaries
                (order_id, customer_id, status, total, item_count, tracking_number,
                 last_version, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (order_id) DO UPDATE
            SET customer_id = EXCLUDED.customer_id,
                status = EXCLUDED.status,
                total = EXCLUDED.total,
                item_count = EXCLUDED.item_count,
                tracking_number = EXCLUDED.tracking_number,
                last_version = EXCLUDED.last_version,
                updated_at = EXCLUDED.updated_at
            WHERE order_summaries.last_version < EXCLUDED.last_version
            ",
        )
        .bind(summary.order_id.to_string())
        .bind(&summary.customer_id)
        .bind(summary.status.as_str())
        .bind(summary.total)
        .bind(summary.item_count)
        .bind(&summary.tracking_number)
        .bind(summary.last_version)
        .bind(summary.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn by_customer(&self, customer_id: &str) -> Result<Vec<OrderSummary>, DomainError> {
        let rows = sqlx::query(
            r"
            SELECT order_id, customer_id, status, total, item_count, tracking_number,
                   last_version, updated_at
            FROM order_summaries
            WHERE customer_id = $1
            ORDER BY updated_at DESC
            ",
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter().map(summary_from_row).collect()
    }

    async fn clear(&self) -> Result<(), DomainError> {
        sqlx::query("TRUNCATE order_summaries")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}
