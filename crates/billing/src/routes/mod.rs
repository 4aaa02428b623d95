//! HTTP route handlers for billing.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                        - Liveness check
//! GET  /health/ready                  - Readiness check (order store reachable)
//!
//! # Orders
//! POST /api/orders                    - Create an order from a cart
//! GET  /api/orders/{order_id}         - Order with line items
//! GET  /api/orders/{order_id}/events  - Audit trail, newest first
//! POST /api/orders/{order_id}/payment - Start payment, returns redirect URL
//! POST /api/orders/{order_id}/refund  - Refund the recorded payment
//!
//! # Payment returns
//! GET  /checkout/success?orderId&paymentId - Payer came back after paying
//! GET  /checkout/cancel?orderId            - Payer abandoned payment
//!
//! # Webhooks
//! POST /api/webhooks/payment          - Gateway notification (form or JSON)
//!
//! # Admin
//! GET  /api/admin/orders?page&limit&status - Paged order list
//!
//! # Users
//! GET  /api/users/{user_id}/orders    - Order history
//! GET  /api/users/{user_id}/activity  - Events across all orders
//! ```

pub mod admin;
pub mod checkout;
pub mod health;
pub mod orders;
pub mod users;
pub mod webhook;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::middleware::request_id_middleware;
use crate::state::AppState;

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(orders::create))
        .route("/{order_id}", get(orders::show))
        .route("/{order_id}/events", get(orders::events))
        .route("/{order_id}/payment", post(orders::initiate_payment))
        .route("/{order_id}/refund", post(orders::refund))
}

/// Create the payment return routes router.
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/success", get(checkout::success))
        .route("/cancel", get(checkout::cancel))
}

/// Create the user routes router.
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/{user_id}/orders", get(users::orders))
        .route("/{user_id}/activity", get(users::activity))
}

/// Create all routes for billing.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .nest("/api/orders", order_routes())
        .nest("/checkout", checkout_routes())
        .route("/api/webhooks/payment", post(webhook::payment))
        .route("/api/admin/orders", get(admin::orders))
        .nest("/api/users", user_routes())
}

/// Build the application with its request tracing layers.
///
/// Sentry layers are added by the binary, outside this router.
pub fn app(state: AppState) -> Router {
    routes()
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_id_middleware)),
        )
        .with_state(state)
}
