//! Order domain types.
//!
//! An [`Order`] is a snapshot: customer details and line item titles/prices are
//! copied at checkout and never re-derived from the live profile or catalog.
//! Monetary fields are fixed when the order is created; later updates touch
//! only status, payment reference and `updated_at`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gallery_core::{
    Email, OrderEventId, OrderItemId, OrderNumber, OrderStatus, ProductId, UserId, round_money,
};

/// Conventional values for [`OrderEvent::event_type`].
pub mod event_types {
    use gallery_core::OrderStatus;

    /// Appended once when the order is created.
    pub const ORDER_PLACED: &str = "order_placed";
    /// Appended when a provider payment reference is recorded.
    pub const PAYMENT_INITIATED: &str = "payment_initiated";
    /// Appended when a verified payment moves the order to `paid`.
    pub const PAYMENT_COMPLETED: &str = "payment_completed";
    /// Appended when a provider refund moves the order to `refunded`.
    pub const PAYMENT_REFUNDED: &str = "payment_refunded";

    /// Default event type for a status change, e.g. `status_cancelled`.
    #[must_use]
    pub fn status_changed(status: OrderStatus) -> String {
        format!("status_{status}")
    }

    /// Default description for a status change.
    #[must_use]
    pub fn status_changed_description(status: OrderStatus) -> String {
        format!("Order status changed to {status}")
    }
}

/// Contact and shipping details captured at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: Email,
    #[serde(default)]
    pub phone: Option<String>,
    pub address: String,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    pub zip: String,
    pub country: String,
}

impl CustomerDetails {
    /// Full name for gateway forms and emails.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_owned()
    }
}

/// Order money, computed once at creation.
///
/// `total == subtotal + shipping + tax` always holds: the only public
/// constructor computes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderTotals {
    subtotal: Decimal,
    shipping: Decimal,
    tax: Decimal,
    total: Decimal,
}

impl OrderTotals {
    /// Compute totals from their parts.
    #[must_use]
    pub fn new(subtotal: Decimal, shipping: Decimal, tax: Decimal) -> Self {
        let subtotal = round_money(subtotal);
        let shipping = round_money(shipping);
        let tax = round_money(tax);
        Self {
            subtotal,
            shipping,
            tax,
            total: subtotal + shipping + tax,
        }
    }

    /// Rebuild totals read back from storage.
    ///
    /// Returns `None` if the stored total disagrees with its parts.
    #[must_use]
    pub fn from_stored(
        subtotal: Decimal,
        shipping: Decimal,
        tax: Decimal,
        total: Decimal,
    ) -> Option<Self> {
        (subtotal + shipping + tax == total).then_some(Self {
            subtotal,
            shipping,
            tax,
            total,
        })
    }

    #[must_use]
    pub const fn subtotal(&self) -> Decimal {
        self.subtotal
    }

    #[must_use]
    pub const fn shipping(&self) -> Decimal {
        self.shipping
    }

    #[must_use]
    pub const fn tax(&self) -> Decimal {
        self.tax
    }

    #[must_use]
    pub const fn total(&self) -> Decimal {
        self.total
    }
}

/// A checkout transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    /// Human-readable order number (`ORD-...`).
    pub id: OrderNumber,
    /// Account that placed the order; `None` for guest checkout.
    pub user_id: Option<UserId>,
    /// Customer snapshot taken at checkout.
    pub customer: CustomerDetails,
    /// Write-once money fields.
    pub totals: OrderTotals,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Name of the provider handling payment.
    pub payment_method: Option<String>,
    /// Provider's payment reference.
    pub payment_id: Option<String>,
    /// Free-text notes from the customer.
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data needed to insert an order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderNumber,
    pub user_id: Option<UserId>,
    pub customer: CustomerDetails,
    pub totals: OrderTotals,
    pub notes: Option<String>,
}

/// A line item before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    /// Product title at purchase time.
    pub product_title: String,
    /// Product SKU at purchase time.
    pub product_sku: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    /// Always `unit_price * quantity`.
    pub total_price: Decimal,
}

impl NewOrderItem {
    /// Build a line item, computing its total.
    ///
    /// Returns `None` if the total overflows [`Decimal`].
    #[must_use]
    pub fn new(
        product_id: ProductId,
        product_title: impl Into<String>,
        product_sku: Option<String>,
        unit_price: Decimal,
        quantity: u32,
    ) -> Option<Self> {
        let unit_price = round_money(unit_price);
        let total_price = unit_price.checked_mul(Decimal::from(quantity))?;
        Some(Self {
            product_id,
            product_title: product_title.into(),
            product_sku,
            quantity,
            unit_price,
            total_price,
        })
    }
}

/// A stored line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderNumber,
    pub product_id: ProductId,
    pub product_title: String,
    pub product_sku: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub created_at: DateTime<Utc>,
}

/// An order together with its line items (detail views).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// An append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderEvent {
    pub id: OrderEventId,
    pub order_id: OrderNumber,
    /// See [`event_types`].
    pub event_type: String,
    /// Order status at the time of the event.
    pub status: OrderStatus,
    pub description: String,
    /// Opaque metadata, serialized JSON by convention.
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Admin listing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderQuery {
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
    pub status: Option<OrderStatus>,
}

impl OrderQuery {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    /// Build a query with `page >= 1` and `limit` clamped to `1..=100`.
    #[must_use]
    pub fn new(page: u32, limit: u32, status: Option<OrderStatus>) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, Self::MAX_LIMIT),
            status,
        }
    }

    /// Rows to skip.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        (self.page.saturating_sub(1) as u64) * self.limit as u64
    }
}

/// One page of orders plus the total number of matching orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderList {
    pub orders: Vec<Order>,
    pub total: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_sum() {
        let totals = OrderTotals::new(Decimal::new(200, 0), Decimal::ZERO, Decimal::ZERO);
        assert_eq!(totals.total(), Decimal::new(200, 0));

        let totals = OrderTotals::new(
            Decimal::new(10_050, 2),
            Decimal::new(7_500, 2),
            Decimal::new(1_507, 2),
        );
        assert_eq!(totals.total(), Decimal::new(19_057, 2));
    }

    #[test]
    fn test_totals_from_stored_rejects_mismatch() {
        let ok = OrderTotals::from_stored(
            Decimal::new(100, 0),
            Decimal::new(5, 0),
            Decimal::ZERO,
            Decimal::new(105, 0),
        );
        assert!(ok.is_some());

        let bad = OrderTotals::from_stored(
            Decimal::new(100, 0),
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::new(99, 0),
        );
        assert!(bad.is_none());
    }

    #[test]
    fn test_item_total_is_unit_times_quantity() {
        let item = NewOrderItem::new(
            ProductId::new("p1"),
            "Harbour at Dusk",
            None,
            Decimal::new(100, 0),
            2,
        )
        .unwrap();
        assert_eq!(item.total_price, Decimal::new(200, 0));
    }

    #[test]
    fn test_item_total_overflow_is_none() {
        let item = NewOrderItem::new(
            ProductId::new("p1"),
            "Harbour at Dusk",
            None,
            Decimal::MAX,
            10,
        );
        assert!(item.is_none());
    }

    #[test]
    fn test_query_clamps() {
        let q = OrderQuery::new(0, 500, None);
        assert_eq!(q.page, 1);
        assert_eq!(q.limit, OrderQuery::MAX_LIMIT);
        assert_eq!(q.offset(), 0);

        let q = OrderQuery::new(3, 20, Some(OrderStatus::Paid));
        assert_eq!(q.offset(), 40);
    }

    #[test]
    fn test_status_event_type() {
        assert_eq!(
            event_types::status_changed(OrderStatus::Cancelled),
            "status_cancelled"
        );
        assert_eq!(
            event_types::status_changed_description(OrderStatus::Paid),
            "Order status changed to paid"
        );
    }

    #[test]
    fn test_full_name() {
        let customer = CustomerDetails {
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            email: Email::parse("jane@example.com").unwrap(),
            phone: None,
            address: "1 Long St".into(),
            city: "Cape Town".into(),
            state: None,
            zip: "8001".into(),
            country: "ZA".into(),
        };
        assert_eq!(customer.full_name(), "Jane Doe");
    }
}
