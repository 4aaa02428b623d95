//! Per-account order history and activity feed.
//!
//! Callers are trusted to have authenticated the account; session handling
//! lives in front of this service.

use axum::{
    Json,
    extract::{Path, State},
};

use gallery_core::UserId;

use crate::error::Result;
use crate::models::{Order, OrderEvent};
use crate::state::AppState;

/// Orders placed by an account, newest first.
pub async fn orders(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<Vec<Order>>> {
    Ok(Json(state.billing().get_user_orders(&user_id).await?))
}

/// Events across all of an account's orders, newest first.
pub async fn activity(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<Vec<OrderEvent>>> {
    Ok(Json(state.billing().get_user_activity(&user_id).await?))
}
