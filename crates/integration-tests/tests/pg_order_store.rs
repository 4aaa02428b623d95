//! `PostgreSQL` order store.
//!
//! These tests require:
//! - A running `PostgreSQL` database
//! - `BILLING_DATABASE_URL` pointing at it (migrations are applied here)
//!
//! Run with: cargo test -p gallery-integration-tests -- --ignored

use rust_decimal::Decimal;
use secrecy::SecretString;

use gallery_billing::db::{self, OrderStore, PgOrderStore, RepositoryError};
use gallery_billing::models::{NewOrder, NewOrderItem, OrderQuery, OrderTotals, event_types};
use gallery_billing::services::generate_order_number;
use gallery_core::{OrderStatus, ProductId, UserId};
use gallery_integration_tests::jane;

async fn store() -> PgOrderStore {
    let url = std::env::var("BILLING_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .expect("BILLING_DATABASE_URL must be set");
    let pool = db::create_pool(&url).await.expect("connect");
    sqlx::migrate!("../billing/migrations")
        .run(&pool)
        .await
        .expect("migrate");
    PgOrderStore::new(pool)
}

fn new_order(user: Option<&UserId>) -> (NewOrder, Vec<NewOrderItem>) {
    let items = vec![
        NewOrderItem::new(
            ProductId::new("p1"),
            "Harbour at Dawn (print)",
            Some("HAD-A3".to_owned()),
            Decimal::new(12_550, 2),
            2,
        )
        .expect("line total"),
        NewOrderItem::new(
            ProductId::new("p2"),
            "Table Mountain (canvas)",
            None,
            Decimal::new(49_999, 2),
            1,
        )
        .expect("line total"),
    ];
    let subtotal = items.iter().map(|i| i.total_price).sum();
    let order = NewOrder {
        id: generate_order_number(),
        user_id: user.cloned(),
        customer: jane(),
        totals: OrderTotals::new(subtotal, Decimal::new(7_500, 2), Decimal::ZERO),
        notes: Some("Gift wrap please".to_owned()),
    };
    (order, items)
}

// ============================================================================
// Create and read back
// ============================================================================

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_create_round_trip() {
    let store = store().await;
    let (new, items) = new_order(None);

    let order = store.create(new.clone(), items.clone()).await.expect("create");
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.totals, new.totals);

    let detail = store
        .find_by_id_with_items(&order.id)
        .await
        .expect("find")
        .expect("order exists");
    assert_eq!(detail.order, order);
    assert_eq!(detail.items.len(), 2);
    assert_eq!(detail.items[0].product_sku.as_deref(), Some("HAD-A3"));
    assert_eq!(detail.items[0].total_price, Decimal::new(25_100, 2));

    let events = store.events_by_order_id(&order.id).await.expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, event_types::ORDER_PLACED);
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_duplicate_order_number_is_conflict() {
    let store = store().await;
    let (new, items) = new_order(None);

    store.create(new.clone(), items.clone()).await.expect("create");
    let again = store.create(new, items).await;
    assert!(matches!(again, Err(RepositoryError::Conflict(_))));
}

// ============================================================================
// Updates
// ============================================================================

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_updates_append_events() {
    let store = store().await;
    let (new, items) = new_order(None);
    let order = store.create(new, items).await.expect("create");

    let processing = store
        .update_status(&order.id, OrderStatus::Processing, None, None)
        .await
        .expect("update")
        .expect("order exists");
    assert_eq!(processing.status, OrderStatus::Processing);
    assert!(processing.updated_at >= order.updated_at);

    let with_payment = store
        .update_payment(&order.id, "SBX-pg", "sandbox")
        .await
        .expect("payment")
        .expect("order exists");
    assert_eq!(with_payment.payment_id.as_deref(), Some("SBX-pg"));
    assert_eq!(with_payment.totals, order.totals);

    let events = store.events_by_order_id(&order.id).await.expect("events");
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].event_type, event_types::PAYMENT_INITIATED);
    assert_eq!(events[1].event_type, "status_processing");
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_update_missing_order_is_none() {
    let store = store().await;
    let missing = generate_order_number();

    let result = store
        .update_status(&missing, OrderStatus::Paid, None, None)
        .await
        .expect("update");
    assert!(result.is_none());
    assert!(store
        .events_by_order_id(&missing)
        .await
        .expect("events")
        .is_empty());
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_update_status_from_checks_current_status() {
    let store = store().await;
    let (new, items) = new_order(None);
    let order = store.create(new, items).await.expect("create");

    let stale = store
        .update_status_from(&order.id, OrderStatus::Processing, OrderStatus::Paid, None, None)
        .await
        .expect("update");
    assert!(stale.is_none());

    let paid = store
        .update_status_from(&order.id, OrderStatus::Pending, OrderStatus::Paid, None, None)
        .await
        .expect("update")
        .expect("order was pending");
    assert_eq!(paid.status, OrderStatus::Paid);

    let events = store.events_by_order_id(&order.id).await.expect("events");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, "status_paid");
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_user_history_and_activity() {
    let store = store().await;
    let user = UserId::new(format!("pg-user-{}", generate_order_number()));

    let (first, items) = new_order(Some(&user));
    let first = store.create(first, items).await.expect("create");
    let (second, items) = new_order(Some(&user));
    let second = store.create(second, items).await.expect("create");
    store
        .update_status(&first.id, OrderStatus::Cancelled, None, None)
        .await
        .expect("cancel");

    let orders = store.find_by_user_id(&user).await.expect("orders");
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].id, second.id);

    let activity = store.events_by_user_id(&user).await.expect("activity");
    assert_eq!(activity.len(), 3);
    assert_eq!(activity[0].event_type, "status_cancelled");
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_list_filters_by_status() {
    let store = store().await;
    let (new, items) = new_order(None);
    let order = store.create(new, items).await.expect("create");
    store
        .update_status(&order.id, OrderStatus::Shipped, None, None)
        .await
        .expect("ship");

    let shipped = store
        .list(OrderQuery::new(1, 100, Some(OrderStatus::Shipped)))
        .await
        .expect("list");
    assert!(shipped.total >= 1);
    assert!(shipped.orders.iter().all(|o| o.status == OrderStatus::Shipped));

    store.ping().await.expect("ping");
}
