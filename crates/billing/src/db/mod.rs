//! Order persistence.
//!
//! # Database: `gallery_billing`
//!
//! ## Tables
//!
//! - `billing.orders` - One row per checkout, money as `NUMERIC(12,2)`
//! - `billing.order_items` - Line item snapshots, owned by an order
//! - `billing.order_events` - Append-only audit trail
//!
//! The store is the only writer of `order_events`: every successful create,
//! status update or payment update appends exactly one event in the same
//! transaction as the row change.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/billing/migrations/` and run via:
//! ```bash
//! cargo run -p gallery-cli -- migrate
//! ```

pub mod memory;
pub mod orders;

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use gallery_core::{OrderNumber, OrderStatus, UserId};

use crate::models::{
    NewOrder, NewOrderItem, Order, OrderEvent, OrderList, OrderQuery, OrderWithItems,
};

pub use memory::MemoryOrderStore;
pub use orders::PgOrderStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// A value cannot be represented in storage.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Constraint violation (e.g., duplicate order number).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Storage for orders, their line items and their audit trail.
///
/// "Not found" on reads and updates is `Ok(None)`; infrastructure failures
/// are returned unchanged.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert an order with its items and an `order_placed` event, atomically.
    async fn create(&self, order: NewOrder, items: Vec<NewOrderItem>)
    -> Result<Order, RepositoryError>;

    async fn find_by_id(&self, id: &OrderNumber) -> Result<Option<Order>, RepositoryError>;

    async fn find_by_id_with_items(
        &self,
        id: &OrderNumber,
    ) -> Result<Option<OrderWithItems>, RepositoryError>;

    /// All orders placed by an account, newest first.
    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Vec<Order>, RepositoryError>;

    /// Set the status and append one event.
    ///
    /// `event_type` defaults to `status_<status>` and `description` to
    /// "Order status changed to <status>". Returns `None`, appending nothing,
    /// if the order does not exist.
    async fn update_status(
        &self,
        id: &OrderNumber,
        status: OrderStatus,
        event_type: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Like [`update_status`](Self::update_status), but only if the order is
    /// currently in status `from`.
    ///
    /// Returns `None`, appending nothing, if the order does not exist or has
    /// moved on from `from`.
    async fn update_status_from(
        &self,
        id: &OrderNumber,
        from: OrderStatus,
        status: OrderStatus,
        event_type: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Record the provider's payment reference and append a
    /// `payment_initiated` event.
    async fn update_payment(
        &self,
        id: &OrderNumber,
        payment_id: &str,
        payment_method: &str,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Events for one order, newest first.
    async fn events_by_order_id(&self, id: &OrderNumber)
    -> Result<Vec<OrderEvent>, RepositoryError>;

    /// Events across all of an account's orders, newest first.
    async fn events_by_user_id(&self, user_id: &UserId)
    -> Result<Vec<OrderEvent>, RepositoryError>;

    /// One page of orders, newest first, without line items.
    async fn list(&self, query: OrderQuery) -> Result<OrderList, RepositoryError>;

    /// Check that the backing storage is reachable.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Metadata recorded on `payment_initiated` events.
pub(crate) fn payment_metadata(payment_id: &str, payment_method: &str) -> String {
    serde_json::json!({
        "payment_id": payment_id,
        "payment_method": payment_method,
    })
    .to_string()
}

/// Description recorded on the `order_placed` event.
pub(crate) fn order_placed_description(order: &NewOrder) -> String {
    format!("Order placed with total {:.2}", order.totals.total())
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
