//! Hosted-checkout gateway.
//!
//! The payer is sent to the gateway's process page with a signed set of form
//! fields. The gateway confirms payment asynchronously by posting an ITN
//! (instant transaction notification) to the notify URL; the return URL only
//! means the payer came back, so [`verify_payment`](PaymentProvider::verify_payment)
//! reports `pending` and the webhook settles the order.
//!
//! # Form fields
//!
//! | Field | Value |
//! |-------|-------|
//! | `merchant_id`, `merchant_key` | Merchant credentials |
//! | `return_url`, `cancel_url`, `notify_url` | From the request |
//! | `name_first`, `name_last`, `email_address`, `cell_number` | Buyer |
//! | `m_payment_id` | Order number |
//! | `amount` | Two decimal places |
//! | `item_name`, `item_description` | Shown on the payment page |
//! | `custom_str1` | Request metadata as JSON |
//! | `signature` | See [`signature`](super::signature) |

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{info, instrument};
use url::Url;

use gallery_core::{OrderNumber, PaymentStatus};

use super::{
    PaymentError, PaymentProvider, PaymentRequest, PaymentResponse, PaymentVerification,
    RefundResponse, WebhookNotification, decimal_field, required_field, signature,
};

/// Live process page.
pub const LIVE_PROCESS_URL: &str = "https://www.payfast.co.za/eng/process";

/// Sandbox process page.
pub const SANDBOX_PROCESS_URL: &str = "https://sandbox.payfast.co.za/eng/process";

/// Gateways cap `item_name` at 100 characters.
const ITEM_NAME_MAX: usize = 100;

/// Merchant credentials for the hosted gateway.
pub struct HostedGatewayConfig {
    pub merchant_id: String,
    pub merchant_key: SecretString,
    /// Salt appended to every signature, if set on the merchant account.
    pub passphrase: Option<SecretString>,
    pub test_mode: bool,
}

impl std::fmt::Debug for HostedGatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedGatewayConfig")
            .field("merchant_id", &self.merchant_id)
            .field("merchant_key", &"[REDACTED]")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .field("test_mode", &self.test_mode)
            .finish()
    }
}

/// Hosted-checkout gateway with ITN webhooks.
#[derive(Debug)]
pub struct HostedGatewayProvider {
    config: HostedGatewayConfig,
    process_url: Url,
}

impl HostedGatewayProvider {
    /// Build the provider, choosing the sandbox or live host by test mode.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Configuration`] if the merchant credentials
    /// are empty.
    pub fn new(config: HostedGatewayConfig) -> Result<Self, PaymentError> {
        if config.merchant_id.trim().is_empty() {
            return Err(PaymentError::Configuration(
                "merchant id is required".to_owned(),
            ));
        }
        if config.merchant_key.expose_secret().trim().is_empty() {
            return Err(PaymentError::Configuration(
                "merchant key is required".to_owned(),
            ));
        }

        let process_url = Url::parse(if config.test_mode {
            SANDBOX_PROCESS_URL
        } else {
            LIVE_PROCESS_URL
        })?;

        Ok(Self {
            config,
            process_url,
        })
    }

    fn passphrase(&self) -> Option<&str> {
        self.config.passphrase.as_ref().map(|p| p.expose_secret())
    }

    /// The unsigned form fields for a request, in submission order.
    fn form_fields(
        &self,
        request: &PaymentRequest,
    ) -> Result<Vec<(&'static str, String)>, PaymentError> {
        let metadata = serde_json::to_string(&request.metadata)
            .map_err(|e| PaymentError::InvalidRequest(e.to_string()))?;

        let mut item_name = format!("Order {}", request.order_id);
        item_name.truncate(ITEM_NAME_MAX);

        let mut fields = vec![
            ("merchant_id", self.config.merchant_id.clone()),
            (
                "merchant_key",
                self.config.merchant_key.expose_secret().to_owned(),
            ),
            ("return_url", request.return_url.to_string()),
            ("cancel_url", request.cancel_url.to_string()),
            ("notify_url", request.notify_url.to_string()),
            ("name_first", request.customer.first_name.clone()),
            ("name_last", request.customer.last_name.clone()),
            ("email_address", request.customer.email.to_string()),
        ];
        if let Some(phone) = request.customer.phone.as_ref().filter(|p| !p.is_empty()) {
            fields.push(("cell_number", phone.clone()));
        }
        fields.extend([
            ("m_payment_id", request.order_id.to_string()),
            ("amount", request.amount.to_gateway_string()),
            ("item_name", item_name),
            ("item_description", request.description.clone()),
            ("custom_str1", metadata),
        ]);

        Ok(fields)
    }
}

#[async_trait]
impl PaymentProvider for HostedGatewayProvider {
    fn name(&self) -> &str {
        "hosted"
    }

    fn is_test_mode(&self) -> bool {
        self.config.test_mode
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn initiate_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResponse, PaymentError> {
        if request.amount.amount <= Decimal::ZERO {
            return Ok(PaymentResponse::failure("Payment amount must be positive"));
        }

        let mut fields = self.form_fields(request)?;
        let signature = signature::sign(
            fields.iter().map(|(k, v)| (*k, v.as_str())),
            self.passphrase(),
        );
        fields.push((signature::SIGNATURE_FIELD, signature));

        let redirect = Url::parse_with_params(self.process_url.as_str(), &fields)?;

        info!(amount = %request.amount, "Hosted checkout prepared");

        // The gateway assigns its own payment id, delivered later by ITN.
        Ok(PaymentResponse::redirect(None, redirect))
    }

    async fn verify_payment(
        &self,
        payment_id: &str,
        order_id: &OrderNumber,
    ) -> Result<PaymentVerification, PaymentError> {
        Ok(PaymentVerification {
            success: true,
            status: PaymentStatus::Pending,
            payment_id: payment_id.to_owned(),
            order_id: order_id.clone(),
            amount: None,
            error: None,
        })
    }

    fn process_webhook(&self, payload: &Value) -> Result<WebhookNotification, PaymentError> {
        let order_id = required_field(payload, "m_payment_id")?;
        let payment_id = required_field(payload, "pf_payment_id")?;
        let status = payload
            .get("payment_status")
            .and_then(Value::as_str)
            .and_then(PaymentStatus::from_gateway);

        Ok(WebhookNotification {
            payment_id: payment_id.to_owned(),
            order_id: OrderNumber::new(order_id),
            status,
            amount: decimal_field(payload, "amount_gross"),
            signature: payload
                .get(signature::SIGNATURE_FIELD)
                .and_then(Value::as_str)
                .map(str::to_owned),
            raw_payload: payload.clone(),
        })
    }

    fn validate_webhook_signature(&self, payload: &Value, signature: &str) -> bool {
        signature::verify_payload(payload, signature, self.passphrase())
    }

    async fn refund_payment(
        &self,
        _payment_id: &str,
        _amount: Option<Decimal>,
    ) -> Result<RefundResponse, PaymentError> {
        Ok(RefundResponse::manual())
    }
}
