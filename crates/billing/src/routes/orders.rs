//! Order route handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use rust_decimal::Decimal;
use serde::Deserialize;

use gallery_core::OrderNumber;

use crate::error::{AppError, Result};
use crate::models::{Order, OrderEvent, OrderWithItems};
use crate::payment::{PaymentResponse, RefundResponse};
use crate::services::CreateOrderInput;
use crate::state::AppState;

/// Refund request body. Omit `amount` to refund everything.
#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    #[serde(default)]
    pub amount: Option<Decimal>,
}

/// Create an order from a checkout submission.
pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<CreateOrderInput>,
) -> Result<(StatusCode, Json<Order>)> {
    let order = state.billing().create_order(input).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// Show an order with its line items.
pub async fn show(
    State(state): State<AppState>,
    Path(order_id): Path<OrderNumber>,
) -> Result<Json<OrderWithItems>> {
    state
        .billing()
        .get_order(&order_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))
}

/// List an order's events, newest first.
pub async fn events(
    State(state): State<AppState>,
    Path(order_id): Path<OrderNumber>,
) -> Result<Json<Vec<OrderEvent>>> {
    Ok(Json(state.billing().get_order_events(&order_id).await?))
}

/// Start payment for an order.
///
/// A provider rejection is returned with `success: false`; the client shows
/// the error and may try again.
pub async fn initiate_payment(
    State(state): State<AppState>,
    Path(order_id): Path<OrderNumber>,
) -> Result<Json<PaymentResponse>> {
    let response = state
        .billing()
        .initiate_payment(&order_id, state.base_url())
        .await?;
    Ok(Json(response))
}

/// Refund an order's payment.
pub async fn refund(
    State(state): State<AppState>,
    Path(order_id): Path<OrderNumber>,
    body: Option<Json<RefundRequest>>,
) -> Result<Json<RefundResponse>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    state
        .billing()
        .refund_order(&order_id, request.amount)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))
}
