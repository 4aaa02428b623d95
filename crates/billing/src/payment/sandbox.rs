//! Sandbox payment provider.
//!
//! No money moves. Payments get synthetic `SBX-<uuid>` ids and the payer is
//! redirected straight back to the return URL, carrying `orderId` and
//! `paymentId` as query parameters.
//!
//! In test mode every verification is `complete` and every webhook signature
//! is accepted. Outside test mode the provider only confirms payments it
//! issued itself and checks webhook signatures with the configured passphrase.
//! Only the most recent [`ISSUED_CAPACITY`] payments are remembered.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use gallery_core::{OrderNumber, PaymentStatus};

use super::{
    PaymentError, PaymentProvider, PaymentRequest, PaymentResponse, PaymentVerification,
    RefundResponse, WebhookNotification, decimal_field, required_field, signature,
};

/// Prefix of synthetic payment ids.
pub const PAYMENT_ID_PREFIX: &str = "SBX-";

/// How many issued payments are kept for verification.
pub const ISSUED_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
struct IssuedPayment {
    order_id: OrderNumber,
    amount: Decimal,
}

/// Issued payments in issue order, oldest evicted first.
#[derive(Default)]
struct IssuedPayments {
    by_id: HashMap<String, IssuedPayment>,
    oldest_first: VecDeque<String>,
}

impl IssuedPayments {
    fn insert(&mut self, payment_id: String, payment: IssuedPayment, capacity: usize) {
        while self.oldest_first.len() >= capacity {
            let Some(evicted) = self.oldest_first.pop_front() else {
                break;
            };
            self.by_id.remove(&evicted);
        }
        self.oldest_first.push_back(payment_id.clone());
        self.by_id.insert(payment_id, payment);
    }

    fn get(&self, payment_id: &str) -> Option<&IssuedPayment> {
        self.by_id.get(payment_id)
    }
}

/// Synthetic gateway for development and tests.
pub struct SandboxProvider {
    test_mode: bool,
    passphrase: Option<SecretString>,
    capacity: usize,
    issued: RwLock<IssuedPayments>,
}

impl SandboxProvider {
    /// A sandbox in test mode: everything succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::with_mode(true, None)
    }

    /// A sandbox with explicit test mode and signing passphrase.
    #[must_use]
    pub fn with_mode(test_mode: bool, passphrase: Option<SecretString>) -> Self {
        Self {
            test_mode,
            passphrase,
            capacity: ISSUED_CAPACITY,
            issued: RwLock::new(IssuedPayments::default()),
        }
    }

    fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_ref().map(|p| p.expose_secret())
    }
}

impl Default for SandboxProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentProvider for SandboxProvider {
    fn name(&self) -> &str {
        "sandbox"
    }

    fn is_test_mode(&self) -> bool {
        self.test_mode
    }

    fn accepts_unsigned_webhooks(&self) -> bool {
        self.test_mode
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn initiate_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResponse, PaymentError> {
        if request.amount.amount <= Decimal::ZERO {
            return Ok(PaymentResponse::failure("Payment amount must be positive"));
        }

        let payment_id = format!("{PAYMENT_ID_PREFIX}{}", Uuid::new_v4());

        let mut redirect = request.return_url.clone();
        let has_order_id = redirect.query_pairs().any(|(k, _)| k == "orderId");
        {
            let mut query = redirect.query_pairs_mut();
            if !has_order_id {
                query.append_pair("orderId", request.order_id.as_str());
            }
            query.append_pair("paymentId", &payment_id);
        }

        self.issued.write().await.insert(
            payment_id.clone(),
            IssuedPayment {
                order_id: request.order_id.clone(),
                amount: request.amount.amount,
            },
            self.capacity,
        );

        info!(payment_id = %payment_id, amount = %request.amount, "Sandbox payment initiated");

        Ok(PaymentResponse::redirect(Some(payment_id), redirect))
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn verify_payment(
        &self,
        payment_id: &str,
        order_id: &OrderNumber,
    ) -> Result<PaymentVerification, PaymentError> {
        let issued = self.issued.read().await.get(payment_id).cloned();
        let amount = issued.as_ref().map(|p| p.amount);

        if self.test_mode {
            return Ok(PaymentVerification {
                success: true,
                status: PaymentStatus::Complete,
                payment_id: payment_id.to_owned(),
                order_id: order_id.clone(),
                amount,
                error: None,
            });
        }

        let verification = match issued {
            Some(payment) if &payment.order_id == order_id => PaymentVerification {
                success: true,
                status: PaymentStatus::Complete,
                payment_id: payment_id.to_owned(),
                order_id: order_id.clone(),
                amount,
                error: None,
            },
            _ => {
                warn!(payment_id, "Sandbox payment was not issued for this order");
                PaymentVerification {
                    success: false,
                    status: PaymentStatus::Failed,
                    payment_id: payment_id.to_owned(),
                    order_id: order_id.clone(),
                    amount: None,
                    error: Some("Unknown payment".to_owned()),
                }
            }
        };

        Ok(verification)
    }

    fn process_webhook(&self, payload: &Value) -> Result<WebhookNotification, PaymentError> {
        let payment_id = required_field(payload, "paymentId")?;
        let order_id = required_field(payload, "orderId")?;
        let status = payload
            .get("status")
            .and_then(Value::as_str)
            .and_then(PaymentStatus::from_gateway);

        Ok(WebhookNotification {
            payment_id: payment_id.to_owned(),
            order_id: OrderNumber::new(order_id),
            status,
            amount: decimal_field(payload, "amount"),
            signature: payload
                .get(signature::SIGNATURE_FIELD)
                .and_then(Value::as_str)
                .map(str::to_owned),
            raw_payload: payload.clone(),
        })
    }

    fn validate_webhook_signature(&self, payload: &Value, signature: &str) -> bool {
        self.test_mode || signature::verify_payload(payload, signature, self.passphrase())
    }

    #[instrument(skip(self))]
    async fn refund_payment(
        &self,
        payment_id: &str,
        amount: Option<Decimal>,
    ) -> Result<RefundResponse, PaymentError> {
        if self.test_mode {
            info!(payment_id, amount = ?amount, "Sandbox refund issued");
            Ok(RefundResponse::refunded())
        } else {
            Ok(RefundResponse::manual())
        }
    }
}
