//! In-memory order store.
//!
//! Used for sandbox deployments (`BILLING_STORE=memory`) and tests. Each
//! operation holds the write lock for its whole duration, which gives the same
//! atomicity as a database transaction: readers never see an order without its
//! items or its events.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use gallery_core::{OrderEventId, OrderItemId, OrderNumber, OrderStatus, UserId};

use super::{OrderStore, RepositoryError, order_placed_description, payment_metadata};
use crate::models::{
    NewOrder, NewOrderItem, Order, OrderEvent, OrderItem, OrderList, OrderQuery, OrderWithItems,
    event_types,
};

#[derive(Default)]
struct Tables {
    orders: HashMap<OrderNumber, Order>,
    items: HashMap<OrderNumber, Vec<OrderItem>>,
    events: Vec<OrderEvent>,
    next_item_id: i64,
    next_event_id: i64,
}

impl Tables {
    fn append_event(
        &mut self,
        order_id: &OrderNumber,
        event_type: String,
        status: OrderStatus,
        description: String,
        metadata: Option<String>,
    ) {
        self.next_event_id += 1;
        self.events.push(OrderEvent {
            id: OrderEventId::new(self.next_event_id),
            order_id: order_id.clone(),
            event_type,
            status,
            description,
            metadata,
            created_at: Utc::now(),
        });
    }

    fn set_status(
        &mut self,
        id: &OrderNumber,
        from: Option<OrderStatus>,
        status: OrderStatus,
        event_type: Option<&str>,
        description: Option<&str>,
    ) -> Option<Order> {
        let order = self
            .orders
            .get_mut(id)
            .filter(|o| from.is_none_or(|f| o.status == f))?;
        order.status = status;
        order.updated_at = Utc::now();
        let updated = order.clone();

        self.append_event(
            id,
            event_type.map_or_else(|| event_types::status_changed(status), str::to_owned),
            status,
            description.map_or_else(
                || event_types::status_changed_description(status),
                str::to_owned,
            ),
            None,
        );

        Some(updated)
    }

        fn events_where(&self, keep: impl Fn(&OrderEvent) -> bool) -> Vec<OrderEvent> {
        let mut events: Vec<OrderEvent> = self.events.iter().filter(|e| keep(e)).cloned().collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        events
    }
}

/// Order store held in process memory.
#[derive(Default)]
pub struct MemoryOrderStore {
    tables: RwLock<Tables>,
}

impl MemoryOrderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn create(
        &self,
        order: NewOrder,
        items: Vec<NewOrderItem>,
    ) -> Result<Order, RepositoryError> {
        let mut tables = self.tables.write().await;

        if tables.orders.contains_key(&order.id) {
            return Err(RepositoryError::Conflict(
                "order number already exists".to_owned(),
            ));
        }

        let now = Utc::now();
        let description = order_placed_description(&order);
        let stored = Order {
            id: order.id.clone(),
            user_id: order.user_id,
            customer: order.customer,
            totals: order.totals,
            status: OrderStatus::Pending,
            payment_method: None,
            payment_id: None,
            notes: order.notes,
            created_at: now,
            updated_at: now,
        };

        let mut stored_items = Vec::with_capacity(items.len());
        for item in items {
            tables.next_item_id += 1;
            stored_items.push(OrderItem {
                id: OrderItemId::new(tables.next_item_id),
                order_id: order.id.clone(),
                product_id: item.product_id,
                product_title: item.product_title,
                product_sku: item.product_sku,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total_price: item.total_price,
                created_at: now,
            });
        }

        tables.items.insert(order.id.clone(), stored_items);
        tables.orders.insert(order.id.clone(), stored.clone());
        tables.append_event(
            &order.id,
            event_types::ORDER_PLACED.to_owned(),
            stored.status,
            description,
            None,
        );

        Ok(stored)
    }

    async fn find_by_id(&self, id: &OrderNumber) -> Result<Option<Order>, RepositoryError> {
        Ok(self.tables.read().await.orders.get(id).cloned())
    }

    async fn find_by_id_with_items(
        &self,
        id: &OrderNumber,
    ) -> Result<Option<OrderWithItems>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.orders.get(id).map(|order| OrderWithItems {
            order: order.clone(),
            items: tables.items.get(id).cloned().unwrap_or_default(),
        }))
    }

    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Vec<Order>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.user_id.as_ref() == Some(user_id))
            .cloned()
            .collect();
        newest_first(&mut orders);
        Ok(orders)
    }

    async fn update_status(
        &self,
        id: &OrderNumber,
        status: OrderStatus,
        event_type: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .tables
            .write()
            .await
            .set_status(id, None, status, event_type, description))
    }

    async fn update_status_from(
        &self,
        id: &OrderNumber,
        from: OrderStatus,
        status: OrderStatus,
        event_type: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .tables
            .write()
            .await
            .set_status(id, Some(from), status, event_type, description))
    }

    async fn update_payment(
        &self,
        id: &OrderNumber,
        payment_id: &str,
        payment_method: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut tables = self.tables.write().await;

        let Some(order) = tables.orders.get_mut(id) else {
            return Ok(None);
        };
        order.payment_id = Some(payment_id.to_owned());
        order.payment_method = Some(payment_method.to_owned());
        order.updated_at = Utc::now();
        let updated = order.clone();

        tables.append_event(
            id,
            event_types::PAYMENT_INITIATED.to_owned(),
            updated.status,
            format!("Payment initiated with {payment_method}"),
            Some(payment_metadata(payment_id, payment_method)),
        );

        Ok(Some(updated))
    }

    async fn events_by_order_id(
        &self,
        id: &OrderNumber,
    ) -> Result<Vec<OrderEvent>, RepositoryError> {
        Ok(self.tables.read().await.events_where(|e| &e.order_id == id))
    }

    async fn events_by_user_id(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<OrderEvent>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.events_where(|e| {
            tables
                .orders
                .get(&e.order_id)
                .is_some_and(|o| o.user_id.as_ref() == Some(user_id))
        }))
    }

    async fn list(&self, query: OrderQuery) -> Result<OrderList, RepositoryError> {
        let tables = self.tables.read().await;
        let mut matching: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| query.status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        newest_first(&mut matching);

        let total = matching.len() as u64;
        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(query.limit).unwrap_or(usize::MAX);
        let orders = matching.into_iter().skip(offset).take(limit).collect();

        Ok(OrderList { orders, total })
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use rust_decimal::Decimal;

    use gallery_core::{Email, ProductId};

    use super::*;
    use crate::models::{CustomerDetails, OrderTotals};

    fn new_order(id: &str, user: Option<&str>) -> NewOrder {
        NewOrder {
            id: OrderNumber::new(id),
            user_id: user.map(UserId::new),
            customer: CustomerDetails {
                first_name: "Jane".into(),
                last_name: "Doe".into(),
                email: Email::parse("jane@example.com").unwrap(),
                phone: None,
                address: "1 Long St".into(),
                city: "Cape Town".into(),
                state: None,
                zip: "8001".into(),
                country: "ZA".into(),
            },
            totals: OrderTotals::new(Decimal::new(200, 0), Decimal::ZERO, Decimal::ZERO),
            notes: None,
        }
    }

    fn item() -> NewOrderItem {
        NewOrderItem::new(ProductId::new("p1"), "Print", None, Decimal::new(100, 0), 2).unwrap()
    }

    #[tokio::test]
    async fn test_create_appends_order_placed() {
        let store = MemoryOrderStore::new();
        let order = store.create(new_order("ORD-A-1", None), vec![item()]).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);

        let events = store.events_by_order_id(&order.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, event_types::ORDER_PLACED);
        assert_eq!(events[0].description, "Order placed with total 200.00");

        let with_items = store.find_by_id_with_items(&order.id).await.unwrap().unwrap();
        assert_eq!(with_items.items.len(), 1);
        assert_eq!(with_items.items[0].total_price, Decimal::new(200, 0));
    }

    #[tokio::test]
    async fn test_create_duplicate_is_conflict() {
        let store = MemoryOrderStore::new();
        store.create(new_order("ORD-A-1", None), vec![]).await.unwrap();
        let err = store.create(new_order("ORD-A-1", None), vec![]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_missing_order_appends_nothing() {
        let store = MemoryOrderStore::new();
        let missing = OrderNumber::new("ORD-NOPE-1");
        let updated = store
            .update_status(&missing, OrderStatus::Paid, None, None)
            .await
            .unwrap();
        assert!(updated.is_none());
        assert!(store.update_payment(&missing, "p", "sandbox").await.unwrap().is_none());
        assert!(store.events_by_order_id(&missing).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_status_defaults_and_ordering() {
        let store = MemoryOrderStore::new();
        let order = store.create(new_order("ORD-A-1", None), vec![]).await.unwrap();

        store
            .update_status(&order.id, OrderStatus::Cancelled, None, None)
            .await
            .unwrap()
            .unwrap();
        store.update_payment(&order.id, "SBX-1", "sandbox").await.unwrap().unwrap();

        let events = store.events_by_order_id(&order.id).await.unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["payment_initiated", "status_cancelled", "order_placed"]);
        assert_eq!(events[1].description, "Order status changed to cancelled");
        assert!(events[0].metadata.as_deref().unwrap().contains("SBX-1"));
    }

    #[tokio::test]
    async fn test_update_status_from_requires_current_status() {
        let store = MemoryOrderStore::new();
        let order = store.create(new_order("ORD-A-1", None), vec![]).await.unwrap();

        let stale = store
            .update_status_from(&order.id, OrderStatus::Processing, OrderStatus::Paid, None, None)
            .await
            .unwrap();
        assert!(stale.is_none());
        assert_eq!(store.events_by_order_id(&order.id).await.unwrap().len(), 1);

        let paid = store
            .update_status_from(&order.id, OrderStatus::Pending, OrderStatus::Paid, None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(store.events_by_order_id(&order.id).await.unwrap().len(), 2);

        let missing = store
            .update_status_from(
                &OrderNumber::new("ORD-NOPE-1"),
                OrderStatus::Pending,
                OrderStatus::Paid,
                None,
                None,
            )
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_user_history_and_activity() {
        let store = MemoryOrderStore::new();
        store.create(new_order("ORD-A-1", Some("u1")), vec![]).await.unwrap();
        store.create(new_order("ORD-A-2", Some("u1")), vec![]).await.unwrap();
        store.create(new_order("ORD-B-1", Some("u2")), vec![]).await.unwrap();
        store
            .update_status(&OrderNumber::new("ORD-A-1"), OrderStatus::Processing, None, None)
            .await
            .unwrap();

        let user = UserId::new("u1");
        assert_eq!(store.find_by_user_id(&user).await.unwrap().len(), 2);

        let activity = store.events_by_user_id(&user).await.unwrap();
        assert_eq!(activity.len(), 3);
        assert_eq!(activity[0].event_type, "status_processing");
        assert!(activity.iter().all(|e| e.order_id.as_str().starts_with("ORD-A")));
    }

    #[tokio::test]
    async fn test_list_pages_and_filters() {
        let store = MemoryOrderStore::new();
        for n in 0..5 {
            store
                .create(new_order(&format!("ORD-L-{n}"), None), vec![])
                .await
                .unwrap();
        }
        store
            .update_status(&OrderNumber::new("ORD-L-0"), OrderStatus::Paid, None, None)
            .await
            .unwrap();

        let page = store.list(OrderQuery::new(2, 2, None)).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.orders.len(), 2);

        let paid = store
            .list(OrderQuery::new(1, 20, Some(OrderStatus::Paid)))
            .await
            .unwrap();
        assert_eq!(paid.total, 1);
        assert_eq!(paid.orders[0].id.as_str(), "ORD-L-0");
    }
}
