//! Integration tests for Gallery billing.
//!
//! # Running Tests
//!
//! ```bash
//! # In-memory scenarios and router tests
//! cargo test -p gallery-integration-tests
//!
//! # Include the PostgreSQL store tests
//! BILLING_DATABASE_URL=postgres://... cargo test -p gallery-integration-tests -- --ignored
//! ```
//!
//! # Test Categories
//!
//! - `billing_lifecycle` - Order lifecycle through [`BillingService`]
//! - `billing_routes` - HTTP action layer and webhook endpoint
//! - `pg_order_store` - `PostgreSQL` order store (ignored by default)
//!
//! This library holds the shared fixtures: a notifier that records what it
//! was asked to send, one that always fails, and a service wired to the
//! in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};

use gallery_billing::db::MemoryOrderStore;
use gallery_billing::models::CustomerDetails;
use gallery_billing::payment::{
    HostedGatewayConfig, HostedGatewayProvider, PaymentProvider, SandboxProvider,
};
use gallery_billing::services::{
    BillingService, CheckoutSettings, CreateOrderInput, Notification, NotifyError,
    OrderItemInput, OrderNotifier,
};
use gallery_core::{Email, OrderNumber, ProductId, UserId};

/// How long to wait for a background notification.
pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Base URL used when initiating payments.
pub const BASE_URL: &str = "https://example.com";

/// Passphrase the [`hosted_gateway`] merchant account signs with.
pub const HOSTED_PASSPHRASE: &str = "jt7NOE43FZPn";

/// Records every notification it is asked to send.
pub struct RecordingNotifier {
    sent: mpsc::UnboundedSender<Notification>,
}

#[async_trait]
impl OrderNotifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        // The receiver may already be gone when a test ends early.
        let _ = self.sent.send(notification.clone());
        Ok(())
    }
}

/// Fails every delivery.
pub struct FailingNotifier;

#[async_trait]
impl OrderNotifier for FailingNotifier {
    async fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Err(NotifyError::InvalidAddress("always fails".to_owned()))
    }
}

/// Notifications captured by a [`RecordingNotifier`].
pub struct Outbox {
    received: Mutex<mpsc::UnboundedReceiver<Notification>>,
}

impl Outbox {
    /// Wait for the next notification, or `None` after [`NOTIFY_TIMEOUT`].
    pub async fn next(&self) -> Option<Notification> {
        let mut received = self.received.lock().await;
        tokio::time::timeout(NOTIFY_TIMEOUT, received.recv())
            .await
            .ok()
            .flatten()
    }

    /// Assert nothing more arrives within a short grace period.
    ///
    /// # Panics
    ///
    /// Panics if a notification arrives.
    pub async fn assert_empty(&self) {
        let mut received = self.received.lock().await;
        let next = tokio::time::timeout(Duration::from_millis(100), received.recv()).await;
        assert!(
            !matches!(next, Ok(Some(_))),
            "unexpected notification: {next:?}"
        );
    }
}

/// A billing service over the in-memory store with a recording notifier.
pub struct Harness {
    pub billing: BillingService,
    pub store: Arc<MemoryOrderStore>,
    pub outbox: Outbox,
}

impl Harness {
    /// Sandbox provider in test mode.
    #[must_use]
    pub fn new() -> Self {
        Self::with_provider(Arc::new(SandboxProvider::new()))
    }

    /// Any provider.
    #[must_use]
    pub fn with_provider(provider: Arc<dyn PaymentProvider>) -> Self {
        let (sent, received) = mpsc::unbounded_channel();
        let store = Arc::new(MemoryOrderStore::new());
        let billing = BillingService::new(
            Arc::clone(&store) as _,
            provider,
            Arc::new(RecordingNotifier { sent }),
            CheckoutSettings::default(),
        );
        Self {
            billing,
            store,
            outbox: Outbox {
                received: Mutex::new(received),
            },
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// The hosted gateway in test mode, pointed at its sandbox host.
#[must_use]
#[allow(clippy::missing_panics_doc, clippy::unwrap_used)]
pub fn hosted_gateway() -> Arc<HostedGatewayProvider> {
    let config = HostedGatewayConfig {
        merchant_id: "10000100".to_owned(),
        merchant_key: SecretString::from("46f0cd694581a"),
        passphrase: Some(SecretString::from(HOSTED_PASSPHRASE)),
        test_mode: true,
    };
    Arc::new(HostedGatewayProvider::new(config).unwrap())
}

/// An unsigned ITN as the hosted gateway posts it.
#[must_use]
pub fn itn(order_id: &OrderNumber, payment_status: &str) -> Value {
    json!({
        "m_payment_id": order_id.as_str(),
        "pf_payment_id": "1089250",
        "payment_status": payment_status,
        "amount_gross": "200.00",
    })
}

/// The customer used throughout the scenarios.
#[must_use]
#[allow(clippy::missing_panics_doc, clippy::unwrap_used)]
pub fn jane() -> CustomerDetails {
    CustomerDetails {
        first_name: "Jane".to_owned(),
        last_name: "Doe".to_owned(),
        email: Email::parse("jane@example.com").unwrap(),
        phone: Some("+27 21 555 0100".to_owned()),
        address: "1 Gallery Lane".to_owned(),
        city: "Cape Town".to_owned(),
        state: Some("Western Cape".to_owned()),
        zip: "8001".to_owned(),
        country: "ZA".to_owned(),
    }
}

/// A line item input.
#[must_use]
pub fn item(product_id: &str, title: &str, unit_price: Decimal, quantity: u32) -> OrderItemInput {
    OrderItemInput {
        product_id: ProductId::new(product_id),
        product_title: title.to_owned(),
        product_sku: None,
        unit_price,
        quantity,
    }
}

/// Checkout input for Jane with the given items.
#[must_use]
pub fn checkout(items: Vec<OrderItemInput>, user_id: Option<&str>) -> CreateOrderInput {
    CreateOrderInput {
        customer: jane(),
        items,
        notes: None,
        user_id: user_id.map(UserId::new),
    }
}

/// Scenario A's cart: two prints at 100.00.
#[must_use]
pub fn two_prints() -> CreateOrderInput {
    checkout(
        vec![item("p1", "Harbour at Dawn (print)", Decimal::new(100, 0), 2)],
        None,
    )
}
