//! Payment return handlers.
//!
//! The gateway sends the payer back here with `orderId` (and, for the
//! sandbox, `paymentId`) in the query string.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use gallery_core::OrderNumber;

use crate::error::{AppError, Result, add_breadcrumb};
use crate::models::Order;
use crate::state::AppState;

/// Query parameters on the return and cancel URLs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnQuery {
    pub order_id: OrderNumber,
    #[serde(default)]
    pub payment_id: Option<String>,
}

/// Payer returned after paying.
///
/// Without a payment id in the query the recorded one is used. If there is
/// neither, confirmation is left to the gateway's webhook and the order is
/// returned as it stands.
pub async fn success(
    State(state): State<AppState>,
    Query(query): Query<ReturnQuery>,
) -> Result<Json<Order>> {
    add_breadcrumb(
        "checkout",
        "Payer returned from gateway",
        &[("order_id", query.order_id.as_str())],
    );

    let billing = state.billing();
    let not_found = || AppError::NotFound(format!("order {}", query.order_id));

    let payment_id = match query.payment_id.filter(|p| !p.is_empty()) {
        Some(id) => Some(id),
        None => billing
            .get_order(&query.order_id)
            .await?
            .ok_or_else(not_found)?
            .order
            .payment_id,
    };

    let order = match payment_id {
        Some(payment_id) => billing
            .handle_payment_success(&query.order_id, &payment_id)
            .await?,
        None => billing.get_order(&query.order_id).await?.map(|o| o.order),
    };

    order.map(Json).ok_or_else(not_found)
}

/// Payer abandoned payment.
pub async fn cancel(
    State(state): State<AppState>,
    Query(query): Query<ReturnQuery>,
) -> Result<Json<Order>> {
    state
        .billing()
        .handle_payment_cancellation(&query.order_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("order {}", query.order_id)))
}
