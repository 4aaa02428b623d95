//! Order inspection commands.
//!
//! # Usage
//!
//! ```bash
//! # Show an order with its items and audit trail
//! gallery-cli orders show ORD-LOYW3V28-ZZZ
//!
//! # List the newest paid orders
//! gallery-cli orders list --status paid --limit 10
//! ```

use gallery_billing::db::{self, OrderStore, PgOrderStore};
use gallery_billing::models::{Order, OrderQuery};
use gallery_core::{OrderNumber, OrderStatus};

use super::{CommandError, database_url};

async fn connect() -> Result<PgOrderStore, CommandError> {
    let pool = db::create_pool(&database_url()?).await?;
    Ok(PgOrderStore::new(pool))
}

fn summary(order: &Order) -> String {
    format!(
        "{}  {:<10}  {:>12}  {} <{}>  {}",
        order.id,
        order.status,
        order.totals.total(),
        order.customer.full_name(),
        order.customer.email,
        order.created_at.format("%Y-%m-%d %H:%M"),
    )
}

/// Print one order, its line items and its events.
///
/// # Errors
///
/// Returns an error if the id is malformed, the order does not exist or the
/// database cannot be reached.
#[allow(clippy::print_stdout)]
pub async fn show(order_id: &str) -> Result<(), CommandError> {
    let id = OrderNumber::new(order_id);
    if !id.is_well_formed() {
        return Err(CommandError::InvalidArgument(format!(
            "{order_id} is not an order number"
        )));
    }
    let store = connect().await?;

    let Some(detail) = store.find_by_id_with_items(&id).await? else {
        return Err(CommandError::InvalidArgument(format!(
            "order {id} not found"
        )));
    };
    let events = store.events_by_order_id(&id).await?;
    let order = &detail.order;

    println!("{}", summary(order));
    println!(
        "  subtotal {}  shipping {}  tax {}",
        order.totals.subtotal(),
        order.totals.shipping(),
        order.totals.tax()
    );
    if let Some(payment_id) = &order.payment_id {
        println!(
            "  payment {} via {}",
            payment_id,
            order.payment_method.as_deref().unwrap_or("unknown")
        );
    }

    println!("Items:");
    for item in &detail.items {
        println!(
            "  {} x {} @ {} = {}",
            item.quantity, item.product_title, item.unit_price, item.total_price
        );
    }

    println!("Events:");
    for event in &events {
        println!(
            "  {}  {:<20}  {:<10}  {}",
            event.created_at.format("%Y-%m-%d %H:%M:%S"),
            event.event_type,
            event.status,
            event.description
        );
    }
    Ok(())
}

/// Print one page of orders, newest first.
///
/// # Errors
///
/// Returns an error if the status is unknown or the database cannot be
/// reached.
#[allow(clippy::print_stdout)]
pub async fn list(page: u32, limit: u32, status: Option<&str>) -> Result<(), CommandError> {
    let status = status
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(CommandError::InvalidArgument)?;
    let store = connect().await?;

    let query = OrderQuery::new(page, limit, status);
    let list = store.list(query).await?;

    for order in &list.orders {
        println!("{}", summary(order));
    }
    println!(
        "page {} ({} of {} orders)",
        query.page,
        list.orders.len(),
        list.total
    );
    Ok(())
}
