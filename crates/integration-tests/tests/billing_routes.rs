//! HTTP action layer and webhook endpoint.
//!
//! Requests go through the full router with `tower::ServiceExt::oneshot`;
//! nothing listens on a socket.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;

use gallery_billing::db::{MemoryOrderStore, OrderStore};
use gallery_billing::payment::SandboxProvider;
use gallery_billing::payment::signature::sign_payload;
use gallery_billing::routes::{self, webhook::SIGNATURE_HEADER};
use gallery_billing::state::AppState;
use gallery_core::{OrderNumber, OrderStatus};
use gallery_integration_tests::{BASE_URL, HOSTED_PASSPHRASE, Harness, hosted_gateway, itn};

struct TestApp {
    router: Router,
    store: Arc<MemoryOrderStore>,
}

impl TestApp {
    fn new() -> Self {
        Self::from_harness(Harness::new())
    }

    fn from_harness(harness: Harness) -> Self {
        let Harness { billing, store, .. } = harness;
        Self {
            router: routes::app(AppState::new(billing, BASE_URL)),
            store,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).expect("request"))
            .await
    }

    async fn post_json(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
        )
        .await
    }

    async fn create_order(&self) -> OrderNumber {
        let (status, body) = self.post_json("/api/orders", &checkout_body()).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        OrderNumber::new(body["id"].as_str().expect("order id"))
    }

    async fn status_of(&self, order_id: &OrderNumber) -> OrderStatus {
        self.store
            .find_by_id(order_id)
            .await
            .expect("find")
            .expect("order exists")
            .status
    }
}

fn checkout_body() -> Value {
    json!({
        "customer": {
            "first_name": "Jane",
            "last_name": "Doe",
            "email": "jane@example.com",
            "address": "1 Gallery Lane",
            "city": "Cape Town",
            "zip": "8001",
            "country": "ZA"
        },
        "items": [
            {
                "product_id": "p1",
                "product_title": "Harbour at Dawn (print)",
                "unit_price": "100.00",
                "quantity": 2
            }
        ]
    })
}

fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("decimal as string")
        .parse()
        .expect("valid decimal")
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_and_readiness() {
    let app = TestApp::new();

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));

    let (status, _) = app.get("/health/ready").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_request_id_header_is_set() {
    let app = TestApp::new();
    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
        .await
        .expect("router is infallible");

    assert!(response.headers().contains_key("x-request-id"));
}

// ============================================================================
// Orders
// ============================================================================

#[tokio::test]
async fn test_create_and_show_order() {
    let app = TestApp::new();

    let (status, created) = app.post_json("/api/orders", &checkout_body()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");
    assert_eq!(decimal(&created["totals"]["total"]), Decimal::new(200, 0));

    let id = created["id"].as_str().expect("id");
    let (status, shown) = app.get(&format!("/api/orders/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shown["order"]["id"], id);
    assert_eq!(shown["items"][0]["quantity"], 2);
    assert_eq!(decimal(&shown["items"][0]["total_price"]), Decimal::new(200, 0));

    let (status, events) = app.get(&format!("/api/orders/{id}/events")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(events[0]["event_type"], "order_placed");
}

#[tokio::test]
async fn test_create_order_validation_is_bad_request() {
    let app = TestApp::new();
    let mut body = checkout_body();
    body["items"] = json!([]);

    let (status, error) = app.post_json("/api/orders", &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["error"].as_str().expect("message").contains("at least one item"));
}

#[tokio::test]
async fn test_create_order_too_large_to_store_is_bad_request() {
    let app = TestApp::new();

    for (unit_price, quantity) in [
        (json!("70000000000000000000000000000"), json!(10)),
        (json!("10000000000.00"), json!(1)),
        (json!("6000000000.00"), json!(2)),
        (json!("1.00"), json!(3_000_000_000_u64)),
    ] {
        let mut body = checkout_body();
        body["items"][0]["unit_price"] = unit_price;
        body["items"][0]["quantity"] = quantity;

        let (status, error) = app.post_json("/api/orders", &body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{error}");
        assert!(error["error"].as_str().expect("message").contains("too large"));
    }

    let (_, list) = app.get("/api/admin/orders").await;
    assert_eq!(list["total"], json!(0));
}

#[tokio::test]
async fn test_unknown_order_is_not_found() {
    let app = TestApp::new();
    let (status, _) = app.get("/api/orders/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Payment flow
// ============================================================================

#[tokio::test]
async fn test_payment_round_trip_through_return_url() {
    let app = TestApp::new();
    let order_id = app.create_order().await;

    let (status, payment) = app
        .post_json(&format!("/api/orders/{order_id}/payment"), &json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["success"], true);
    assert_eq!(app.status_of(&order_id).await, OrderStatus::Processing);

    // Follow the sandbox redirect back to the shop.
    let redirect = payment["redirect_url"].as_str().expect("redirect url");
    let path = redirect.strip_prefix(BASE_URL).expect("redirect to shop");
    assert!(path.starts_with("/checkout/success?"));

    let (status, order) = app.get(path).await;
    assert_eq!(status, StatusCode::OK, "{order}");
    assert_eq!(order["status"], "paid");
}

#[tokio::test]
async fn test_success_without_payment_id_uses_recorded_one() {
    let app = TestApp::new();
    let order_id = app.create_order().await;
    app.post_json(&format!("/api/orders/{order_id}/payment"), &json!({}))
        .await;

    let (status, order) = app
        .get(&format!("/checkout/success?orderId={order_id}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "paid");
}

#[tokio::test]
async fn test_cancel_return_url() {
    let app = TestApp::new();
    let order_id = app.create_order().await;

    let (status, order) = app
        .get(&format!("/checkout/cancel?orderId={order_id}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "cancelled");

    let (status, _) = app.get("/checkout/cancel?orderId=ORD-NOPE-NOPE").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_refund_endpoint() {
    let app = TestApp::new();
    let order_id = app.create_order().await;
    app.post_json(&format!("/api/orders/{order_id}/payment"), &json!({}))
        .await;

    let (status, refund) = app
        .post_json(
            &format!("/api/orders/{order_id}/refund"),
            &json!({"amount": "50.00"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refund["success"], true);
    assert_eq!(app.status_of(&order_id).await, OrderStatus::Refunded);
}

// ============================================================================
// Webhook
// ============================================================================

#[tokio::test]
async fn test_webhook_form_payload_marks_paid() {
    let app = TestApp::new();
    let order_id = app.create_order().await;

    let (status, _) = app
        .send(
            Request::post("/api/webhooks/payment")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(format!(
                    "paymentId=SBX-1&orderId={order_id}&status=complete&amount=200.00"
                )))
                .expect("request"),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.status_of(&order_id).await, OrderStatus::Paid);
}

#[tokio::test]
async fn test_webhook_bad_signature_still_acknowledged() {
    let provider = SandboxProvider::with_mode(false, Some(SecretString::from("salt")));
    let app = TestApp::from_harness(Harness::with_provider(Arc::new(provider)));
    let order_id = app.create_order().await;

    let payload = json!({
        "paymentId": "SBX-1",
        "orderId": order_id.as_str(),
        "status": "complete",
    });
    let (status, _) = app
        .send(
            Request::post("/api/webhooks/payment")
                .header(header::CONTENT_TYPE, "application/json")
                .header(SIGNATURE_HEADER, "0000")
                .body(Body::from(payload.to_string()))
                .expect("request"),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.status_of(&order_id).await, OrderStatus::Pending);
}

#[tokio::test]
async fn test_webhook_signature_header_accepted() {
    let provider = SandboxProvider::with_mode(false, Some(SecretString::from("salt")));
    let app = TestApp::from_harness(Harness::with_provider(Arc::new(provider)));
    let order_id = app.create_order().await;

    let payload = json!({
        "paymentId": "SBX-1",
        "orderId": order_id.as_str(),
        "status": "complete",
    });
    let signature = sign_payload(&payload, Some("salt"));
    let (status, _) = app
        .send(
            Request::post("/api/webhooks/payment")
                .header(header::CONTENT_TYPE, "application/json")
                .header(SIGNATURE_HEADER, signature)
                .body(Body::from(payload.to_string()))
                .expect("request"),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.status_of(&order_id).await, OrderStatus::Paid);
}

#[tokio::test]
async fn test_hosted_itn_requires_signature() {
    let app = TestApp::from_harness(Harness::with_provider(hosted_gateway()));
    let order_id = app.create_order().await;

    let form = |payload: &Value| {
        payload
            .as_object()
            .expect("itn object")
            .iter()
            .map(|(k, v)| format!("{k}={}", v.as_str().expect("string field")))
            .collect::<Vec<_>>()
            .join("&")
    };
    let post_itn = |body: String| {
        Request::post("/api/webhooks/payment")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .expect("request")
    };

    let mut payload = itn(&order_id, "COMPLETE");
    let (status, _) = app.send(post_itn(form(&payload))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.status_of(&order_id).await, OrderStatus::Pending);

    payload["signature"] = json!(sign_payload(&payload, Some(HOSTED_PASSPHRASE)));
    let (status, _) = app.send(post_itn(form(&payload))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.status_of(&order_id).await, OrderStatus::Paid);
}

#[tokio::test]
async fn test_webhook_unknown_order_acknowledged() {
    let app = TestApp::new();
    let (status, _) = app
        .post_json(
            "/api/webhooks/payment",
            &json!({"paymentId": "SBX-1", "orderId": "ORD-NOPE-NOPE", "status": "complete"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_webhook_unparseable_is_bad_request() {
    let app = TestApp::new();

    let (status, _) = app
        .send(
            Request::post("/api/webhooks/payment")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .expect("request"),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post_json("/api/webhooks/payment", &json!({"status": "complete"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Admin and users
// ============================================================================

#[tokio::test]
async fn test_admin_orders_list() {
    let app = TestApp::new();
    for _ in 0..3 {
        app.create_order().await;
    }

    let (status, page) = app.get("/api/admin/orders?page=1&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 3);
    assert_eq!(page["orders"].as_array().expect("orders").len(), 2);

    let (status, page) = app.get("/api/admin/orders?status=paid").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 0);

    let (status, _) = app.get("/api/admin/orders?status=lost").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_user_orders_and_activity() {
    let app = TestApp::new();
    let mut body = checkout_body();
    body["user_id"] = json!("user-9");
    let (status, created) = app.post_json("/api/orders", &body).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, orders) = app.get("/api/users/user-9/orders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orders[0]["id"], created["id"]);

    let (status, activity) = app.get("/api/users/user-9/activity").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(activity.as_array().expect("events").len(), 1);

    let (status, nobody) = app.get("/api/users/nobody/orders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(nobody, json!([]));
}
