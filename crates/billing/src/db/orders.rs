//! `PostgreSQL` order store.
//!
//! Queries are checked at runtime (`sqlx::query_as` with `FromRow` row types).
//! Every mutation runs in a transaction that also inserts its audit event, so
//! an order can never be observed without its `order_placed` event or with a
//! status change that has no matching event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::instrument;

use gallery_core::{
    Email, OrderEventId, OrderItemId, OrderNumber, OrderStatus, ProductId, UserId,
};

use super::{OrderStore, RepositoryError, order_placed_description, payment_metadata};
use crate::models::{
    CustomerDetails, NewOrder, NewOrderItem, Order, OrderEvent, OrderItem, OrderList, OrderQuery,
    OrderTotals, OrderWithItems, event_types,
};

const ORDER_COLUMNS: &str = "id, user_id, first_name, last_name, email, phone, address, city, \
     state, zip, country, subtotal, shipping, tax, total, status, payment_method, payment_id, \
     notes, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, order_id, product_id, product_title, product_sku, quantity, \
     unit_price, total_price, created_at";

const EVENT_COLUMNS: &str = "id, order_id, event_type, status, description, metadata, created_at";

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderNumber,
    user_id: Option<UserId>,
    first_name: String,
    last_name: String,
    email: String,
    phone: Option<String>,
    address: String,
    city: String,
    state: Option<String>,
    zip: String,
    country: String,
    subtotal: Decimal,
    shipping: Decimal,
    tax: Decimal,
    total: Decimal,
    status: OrderStatus,
    payment_method: Option<String>,
    payment_id: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&r.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })?;
        let totals = OrderTotals::from_stored(r.subtotal, r.shipping, r.tax, r.total)
            .ok_or_else(|| {
                RepositoryError::DataCorruption(format!(
                    "order {} total {} does not match its parts",
                    r.id, r.total
                ))
            })?;

        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            customer: CustomerDetails {
                first_name: r.first_name,
                last_name: r.last_name,
                email,
                phone: r.phone,
                address: r.address,
                city: r.city,
                state: r.state,
                zip: r.zip,
                country: r.country,
            },
            totals,
            status: r.status,
            payment_method: r.payment_method,
            payment_id: r.payment_id,
            notes: r.notes,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: OrderItemId,
    order_id: OrderNumber,
    product_id: ProductId,
    product_title: String,
    product_sku: Option<String>,
    quantity: i32,
    unit_price: Decimal,
    total_price: Decimal,
    created_at: DateTime<Utc>,
}

impl TryFrom<ItemRow> for OrderItem {
    type Error = RepositoryError;

    fn try_from(r: ItemRow) -> Result<Self, Self::Error> {
        let quantity = u32::try_from(r.quantity).map_err(|_| {
            RepositoryError::DataCorruption(format!("invalid quantity {} on item {}", r.quantity, r.id))
        })?;

        Ok(Self {
            id: r.id,
            order_id: r.order_id,
            product_id: r.product_id,
            product_title: r.product_title,
            product_sku: r.product_sku,
            quantity,
            unit_price: r.unit_price,
            total_price: r.total_price,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: OrderEventId,
    order_id: OrderNumber,
    event_type: String,
    status: OrderStatus,
    description: String,
    metadata: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for OrderEvent {
    fn from(r: EventRow) -> Self {
        Self {
            id: r.id,
            order_id: r.order_id,
            event_type: r.event_type,
            status: r.status,
            description: r.description,
            metadata: r.metadata,
            created_at: r.created_at,
        }
    }
}

/// Order store backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Create a new order store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Set the status, optionally only when it currently is `from`.
    async fn set_status(
        &self,
        id: &OrderNumber,
        from: Option<OrderStatus>,
        status: OrderStatus,
        event_type: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r"
            UPDATE billing.orders
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND ($3::billing.order_status IS NULL OR status = $3)
            RETURNING {ORDER_COLUMNS}
            "
        );
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(status)
            .bind(from)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let event_type = event_type.map_or_else(|| event_types::status_changed(status), str::to_owned);
        let description = description.map_or_else(
            || event_types::status_changed_description(status),
            str::to_owned,
        );
        append_event(&mut tx, id, &event_type, status, &description, None).await?;

        tx.commit().await?;

        Order::try_from(row).map(Some)
    }
}

/// Append an event inside an open transaction.
async fn append_event(
    tx: &mut Transaction<'_, Postgres>,
    order_id: &OrderNumber,
    event_type: &str,
    status: OrderStatus,
    description: &str,
    metadata: Option<&str>,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r"
        INSERT INTO billing.order_events (order_id, event_type, status, description, metadata)
        VALUES ($1, $2, $3, $4, $5)
        ",
    )
    .bind(order_id)
    .bind(event_type)
    .bind(status)
    .bind(description)
    .bind(metadata)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[async_trait]
impl OrderStore for PgOrderStore {
    #[instrument(skip(self, order, items), fields(order_id = %order.id, items = items.len()))]
    async fn create(
        &self,
        order: NewOrder,
        items: Vec<NewOrderItem>,
    ) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r"
            INSERT INTO billing.orders (
                id, user_id, first_name, last_name, email, phone, address, city, state, zip,
                country, subtotal, shipping, tax, total, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {ORDER_COLUMNS}
            "
        );
        let row: OrderRow = sqlx::query_as(&sql)
            .bind(&order.id)
            .bind(order.user_id.as_ref())
            .bind(&order.customer.first_name)
            .bind(&order.customer.last_name)
            .bind(order.customer.email.as_str())
            .bind(order.customer.phone.as_deref())
            .bind(&order.customer.address)
            .bind(&order.customer.city)
            .bind(order.customer.state.as_deref())
            .bind(&order.customer.zip)
            .bind(&order.customer.country)
            .bind(order.totals.subtotal())
            .bind(order.totals.shipping())
            .bind(order.totals.tax())
            .bind(order.totals.total())
            .bind(order.notes.as_deref())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_unique_violation()
                {
                    return RepositoryError::Conflict("order number already exists".to_owned());
                }
                RepositoryError::Database(e)
            })?;

        for item in &items {
            let quantity = i32::try_from(item.quantity).map_err(|_| {
                RepositoryError::InvalidInput(format!("quantity {} out of range", item.quantity))
            })?;

            sqlx::query(
                r"
                INSERT INTO billing.order_items (
                    order_id, product_id, product_title, product_sku, quantity,
                    unit_price, total_price
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(&order.id)
            .bind(&item.product_id)
            .bind(&item.product_title)
            .bind(item.product_sku.as_deref())
            .bind(quantity)
            .bind(item.unit_price)
            .bind(item.total_price)
            .execute(&mut *tx)
            .await?;
        }

        append_event(
            &mut tx,
            &order.id,
            event_types::ORDER_PLACED,
            row.status,
            &order_placed_description(&order),
            None,
        )
        .await?;

        tx.commit().await?;

        Order::try_from(row)
    }

    async fn find_by_id(&self, id: &OrderNumber) -> Result<Option<Order>, RepositoryError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM billing.orders WHERE id = $1");
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Order::try_from).transpose()
    }

    async fn find_by_id_with_items(
        &self,
        id: &OrderNumber,
    ) -> Result<Option<OrderWithItems>, RepositoryError> {
        let Some(order) = self.find_by_id(id).await? else {
            return Ok(None);
        };

        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM billing.order_items WHERE order_id = $1 ORDER BY id ASC"
        );
        let rows: Vec<ItemRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(OrderItem::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(OrderWithItems { order, items }))
    }

    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Vec<Order>, RepositoryError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM billing.orders WHERE user_id = $1 ORDER BY created_at DESC"
        );
        let rows: Vec<OrderRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Order::try_from).collect()
    }

    #[instrument(skip(self, event_type, description), fields(order_id = %id, status = %status))]
    async fn update_status(
        &self,
        id: &OrderNumber,
        status: OrderStatus,
        event_type: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Order>, RepositoryError> {
        self.set_status(id, None, status, event_type, description)
            .await
    }

    #[instrument(skip(self, event_type, description), fields(order_id = %id, from = %from, status = %status))]
    async fn update_status_from(
        &self,
        id: &OrderNumber,
        from: OrderStatus,
        status: OrderStatus,
        event_type: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Order>, RepositoryError> {
        self.set_status(id, Some(from), status, event_type, description)
            .await
    }

    #[instrument(skip(self), fields(order_id = %id))]
    async fn update_payment(
        &self,
        id: &OrderNumber,
        payment_id: &str,
        payment_method: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r"
            UPDATE billing.orders
            SET payment_id = $2, payment_method = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "
        );
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(payment_id)
            .bind(payment_method)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        append_event(
            &mut tx,
            id,
            event_types::PAYMENT_INITIATED,
            row.status,
            &format!("Payment initiated with {payment_method}"),
            Some(&payment_metadata(payment_id, payment_method)),
        )
        .await?;

        tx.commit().await?;

        Order::try_from(row).map(Some)
    }

    async fn events_by_order_id(
        &self,
        id: &OrderNumber,
    ) -> Result<Vec<OrderEvent>, RepositoryError> {
        let sql = format!(
            r"
            SELECT {EVENT_COLUMNS}
            FROM billing.order_events
            WHERE order_id = $1
            ORDER BY created_at DESC, id DESC
            "
        );
        let rows: Vec<EventRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(OrderEvent::from).collect())
    }

    async fn events_by_user_id(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<OrderEvent>, RepositoryError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r"
            SELECT e.id, e.order_id, e.event_type, e.status, e.description, e.metadata,
                   e.created_at
            FROM billing.order_events e
            JOIN billing.orders o ON o.id = e.order_id
            WHERE o.user_id = $1
            ORDER BY e.created_at DESC, e.id DESC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OrderEvent::from).collect())
    }

    async fn list(&self, query: OrderQuery) -> Result<OrderList, RepositoryError> {
        let limit = i64::from(query.limit);
        let offset = i64::try_from(query.offset())
            .map_err(|_| RepositoryError::InvalidInput("page out of range".to_owned()))?;

        let sql = format!(
            r"
            SELECT {ORDER_COLUMNS}
            FROM billing.orders
            WHERE ($1::billing.order_status IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "
        );
        let rows: Vec<OrderRow> = sqlx::query_as(&sql)
            .bind(query.status)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let total: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM billing.orders
            WHERE ($1::billing.order_status IS NULL OR status = $1)
            ",
        )
        .bind(query.status)
        .fetch_one(&self.pool)
        .await?;

        let orders = rows
            .into_iter()
            .map(Order::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OrderList {
            orders,
            total: u64::try_from(total).unwrap_or(0),
        })
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
