//! Payment gateway abstraction.
//!
//! [`BillingService`](crate::services::BillingService) only ever talks to a
//! `dyn PaymentProvider`; which gateway sits behind it is decided once at
//! startup from configuration.
//!
//! # Providers
//!
//! - [`SandboxProvider`] - Synthetic gateway for development and tests
//! - [`HostedGatewayProvider`] - Hosted-checkout gateway with signed form
//!   fields and ITN (instant transaction notification) webhooks

pub mod hosted;
pub mod sandbox;
pub mod signature;

use std::collections::BTreeMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use gallery_core::{Email, Money, OrderNumber, PaymentStatus};

pub use hosted::{HostedGatewayConfig, HostedGatewayProvider};
pub use sandbox::SandboxProvider;

/// Message returned by providers that cannot refund programmatically.
pub const MANUAL_REFUND_REQUIRED: &str =
    "Refunds must be processed manually through the payment provider dashboard";

/// Errors raised by payment providers.
///
/// Ordinary gateway rejections are not errors: they are reported through
/// `success: false` on the response types.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The request could not be turned into a gateway call.
    #[error("invalid payment request: {0}")]
    InvalidRequest(String),

    /// The webhook payload is missing required fields.
    #[error("malformed webhook: {0}")]
    MalformedWebhook(String),

    /// The provider is missing credentials or settings.
    #[error("payment provider misconfigured: {0}")]
    Configuration(String),

    /// A gateway URL could not be built.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Buyer details forwarded to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCustomer {
    pub first_name: String,
    pub last_name: String,
    pub email: Email,
    pub phone: Option<String>,
}

/// Everything a provider needs to start collecting a payment.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub order_id: OrderNumber,
    pub amount: Money,
    /// Short description shown on the gateway's payment page.
    pub description: String,
    pub customer: PaymentCustomer,
    /// Where the payer lands after paying.
    pub return_url: Url,
    /// Where the payer lands after abandoning payment.
    pub cancel_url: Url,
    /// Where the gateway posts asynchronous notifications.
    pub notify_url: Url,
    pub metadata: BTreeMap<String, String>,
}

/// Result of [`PaymentProvider::initiate_payment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    /// Page the payer must be sent to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PaymentResponse {
    /// A successful initiation.
    #[must_use]
    pub fn redirect(payment_id: Option<String>, redirect_url: impl Into<String>) -> Self {
        Self {
            success: true,
            payment_id,
            redirect_url: Some(redirect_url.into()),
            error: None,
        }
    }

    /// A rejected initiation.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            payment_id: None,
            redirect_url: None,
            error: Some(error.into()),
        }
    }
}

/// Result of [`PaymentProvider::verify_payment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentVerification {
    pub success: bool,
    pub status: PaymentStatus,
    pub payment_id: String,
    pub order_id: OrderNumber,
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A provider notification normalized into one shape.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookNotification {
    pub payment_id: String,
    pub order_id: OrderNumber,
    /// `None` when the gateway reported a status billing does not know.
    pub status: Option<PaymentStatus>,
    pub amount: Option<Decimal>,
    pub signature: Option<String>,
    pub raw_payload: Value,
}

/// Result of [`PaymentProvider::refund_payment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RefundResponse {
    #[must_use]
    pub const fn refunded() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// The gateway has no refund API; an operator must refund by hand.
    #[must_use]
    pub fn manual() -> Self {
        Self {
            success: false,
            error: Some(MANUAL_REFUND_REQUIRED.to_owned()),
        }
    }
}

/// A payment gateway.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Identifier stored on the order as its payment method.
    fn name(&self) -> &str;

    /// Whether the provider runs against a sandbox.
    fn is_test_mode(&self) -> bool;

    /// Whether notifications without any signature may be applied.
    ///
    /// Real gateways always sign, so the default is `false` even in test mode.
    fn accepts_unsigned_webhooks(&self) -> bool {
        false
    }

    /// Start a payment and return where to send the payer.
    async fn initiate_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResponse, PaymentError>;

    /// Ask the gateway what happened to a payment.
    async fn verify_payment(
        &self,
        payment_id: &str,
        order_id: &OrderNumber,
    ) -> Result<PaymentVerification, PaymentError>;

    /// Normalize a raw notification payload.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::MalformedWebhook`] if required fields are missing.
    fn process_webhook(&self, payload: &Value) -> Result<WebhookNotification, PaymentError>;

    /// Check a notification's signature.
    fn validate_webhook_signature(&self, payload: &Value, signature: &str) -> bool;

    /// Refund all of a payment, or `amount` of it.
    async fn refund_payment(
        &self,
        payment_id: &str,
        amount: Option<Decimal>,
    ) -> Result<RefundResponse, PaymentError>;
}

/// Read a required string field from a notification payload.
pub(crate) fn required_field<'a>(payload: &'a Value, key: &str) -> Result<&'a str, PaymentError> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PaymentError::MalformedWebhook(format!("missing field `{key}`")))
}

/// Read an optional decimal field that may be sent as a string or a number.
pub(crate) fn decimal_field(payload: &Value, key: &str) -> Option<Decimal> {
    match payload.get(key)? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}
