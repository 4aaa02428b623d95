//! Admin order list.
//!
//! Returns orders without line items; the detail view fetches items through
//! `GET /api/orders/{order_id}`.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::error::Result;
use crate::models::{OrderList, OrderQuery};
use crate::state::AppState;

/// Query parameters for the admin order list.
#[derive(Debug, Deserialize)]
pub struct AdminOrdersQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Status filter; `all` or absent lists every order.
    #[serde(default)]
    pub status: Option<String>,
}

const fn default_page() -> u32 {
    1
}

const fn default_limit() -> u32 {
    OrderQuery::DEFAULT_LIMIT
}

/// List orders, newest first.
pub async fn orders(
    State(state): State<AppState>,
    Query(query): Query<AdminOrdersQuery>,
) -> Result<Json<OrderList>> {
    let list = state
        .billing()
        .get_admin_orders(query.page, query.limit, query.status.as_deref())
        .await?;
    Ok(Json(list))
}
