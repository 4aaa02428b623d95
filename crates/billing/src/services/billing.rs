//! Order and payment orchestration.
//!
//! Every business rule about orders lives here. Routes and the webhook
//! handler call [`BillingService`]; it talks to an [`OrderStore`] and a
//! [`PaymentProvider`] and hands confirmations to an [`OrderNotifier`].
//!
//! # Lifecycle
//!
//! ```text
//! create_order ──► pending ──initiate_payment──► processing ──payment──► paid
//!                     │                              │                    │
//!                     └────────── cancellation ──────┴──► cancelled       └─refund─► refunded
//! ```
//!
//! Any status may be set from any status. Moves outside the usual flow are
//! logged at `warn` but not rejected.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use url::Url;

use gallery_core::{
    CurrencyCode, Money, OrderNumber, OrderStatus, PaymentStatus, ProductId, UserId,
    order_status_for_payment,
};

use super::notify::{Notification, OrderNotifier, spawn_notification};
use super::order_number::generate_order_number;
use crate::db::{OrderStore, RepositoryError};
use crate::models::{
    CustomerDetails, NewOrder, NewOrderItem, Order, OrderEvent, OrderList, OrderQuery,
    OrderTotals, OrderWithItems, event_types,
};
use crate::payment::signature::SIGNATURE_FIELD;
use crate::payment::{
    PaymentCustomer, PaymentError, PaymentProvider, PaymentRequest, PaymentResponse,
    RefundResponse,
};

/// Attempts at finding an unused order number before giving up.
const ORDER_NUMBER_ATTEMPTS: usize = 3;

/// Attempts at applying a status change while other updates race it.
const STATUS_UPDATE_ATTEMPTS: usize = 3;

/// Largest amount the `NUMERIC(12,2)` money columns hold: 9 999 999 999.99.
pub const MAX_ORDER_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_0FFF, 0xE8, 0, false, 2);

/// Largest quantity the `INTEGER` quantity column holds.
pub const MAX_ITEM_QUANTITY: u32 = 2_147_483_647;

/// Errors from billing operations.
///
/// A missing order is not an error: lookups return `None`.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// The checkout input cannot become an order.
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// An order status string was not recognized.
    #[error("invalid order status: {0}")]
    InvalidStatus(String),

    /// The base URL for payment redirects is not a valid URL.
    #[error("invalid base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Deployment settings used when talking to the payment provider.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub currency: CurrencyCode,
    /// Shown on payment pages and in emails.
    pub store_name: String,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            currency: CurrencyCode::ZAR,
            store_name: "Gallery".to_owned(),
        }
    }
}

/// A line item as submitted at checkout.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderItemInput {
    pub product_id: ProductId,
    pub product_title: String,
    #[serde(default)]
    pub product_sku: Option<String>,
    pub unit_price: Decimal,
    pub quantity: u32,
}

/// Checkout input for [`BillingService::create_order`].
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderInput {
    pub customer: CustomerDetails,
    pub items: Vec<OrderItemInput>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Account placing the order; `None` for guest checkout.
    #[serde(default)]
    pub user_id: Option<UserId>,
}

impl CreateOrderInput {
    fn validate(&self) -> Result<(), BillingError> {
        if self.items.is_empty() {
            return Err(BillingError::InvalidOrder(
                "an order needs at least one item".to_owned(),
            ));
        }
        for item in &self.items {
            if item.quantity == 0 {
                return Err(BillingError::InvalidOrder(format!(
                    "quantity for product {} must be positive",
                    item.product_id
                )));
            }
            if item.quantity > MAX_ITEM_QUANTITY {
                return Err(BillingError::InvalidOrder(format!(
                    "quantity for product {} is too large",
                    item.product_id
                )));
            }
            if item.unit_price.is_sign_negative() {
                return Err(BillingError::InvalidOrder(format!(
                    "price for product {} must not be negative",
                    item.product_id
                )));
            }
            if item.unit_price > MAX_ORDER_AMOUNT {
                return Err(BillingError::InvalidOrder(format!(
                    "price for product {} is too large",
                    item.product_id
                )));
            }
            if item.product_title.trim().is_empty() {
                return Err(BillingError::InvalidOrder(format!(
                    "product {} has no title",
                    item.product_id
                )));
            }
        }
        Ok(())
    }
}

/// Build the line items for validated input, rejecting line totals the
/// money columns cannot hold.
fn line_items(items: Vec<OrderItemInput>) -> Result<Vec<NewOrderItem>, BillingError> {
    items
        .into_iter()
        .map(|item| {
            let product_id = item.product_id.clone();
            NewOrderItem::new(
                item.product_id,
                item.product_title,
                item.product_sku,
                item.unit_price,
                item.quantity,
            )
            .filter(|line| line.total_price <= MAX_ORDER_AMOUNT)
            .ok_or_else(|| {
                BillingError::InvalidOrder(format!("total for product {product_id} is too large"))
            })
        })
        .collect()
}

/// Sum the line totals, rejecting a subtotal the money columns cannot hold.
fn order_subtotal(items: &[NewOrderItem]) -> Result<Decimal, BillingError> {
    items
        .iter()
        .try_fold(Decimal::ZERO, |sum, item| sum.checked_add(item.total_price))
        .filter(|subtotal| *subtotal <= MAX_ORDER_AMOUNT)
        .ok_or_else(|| BillingError::InvalidOrder("order total is too large".to_owned()))
}

/// Parse an admin status filter. Empty and `all` mean no filter.
fn parse_status_filter(status: Option<&str>) -> Result<Option<OrderStatus>, BillingError> {
    match status.map(str::trim) {
        None | Some("" | "all") => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| BillingError::InvalidStatus(s.to_owned())),
    }
}

/// Billing orchestration, shared by every request.
pub struct BillingService {
    store: Arc<dyn OrderStore>,
    provider: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn OrderNotifier>,
    settings: CheckoutSettings,
}

impl BillingService {
    #[must_use]
    pub fn new(
        store: Arc<dyn OrderStore>,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn OrderNotifier>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            store,
            provider,
            notifier,
            settings,
        }
    }

    #[must_use]
    pub fn provider(&self) -> &dyn PaymentProvider {
        self.provider.as_ref()
    }

    #[must_use]
    pub const fn settings(&self) -> &CheckoutSettings {
        &self.settings
    }

    /// Check that the order store is reachable.
    ///
    /// # Errors
    ///
    /// Returns the store's error if it is not.
    pub async fn ping(&self) -> Result<(), BillingError> {
        Ok(self.store.ping().await?)
    }

    /// Create a `pending` order and send the order confirmation.
    ///
    /// Shipping and tax are zero, so the total is the sum of the line items.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::InvalidOrder`] for an empty cart, a zero
    /// quantity, a negative price or amounts above [`MAX_ORDER_AMOUNT`], and
    /// store errors unchanged.
    #[instrument(skip(self, input), fields(items = input.items.len()))]
    pub async fn create_order(&self, input: CreateOrderInput) -> Result<Order, BillingError> {
        input.validate()?;

        let items = line_items(input.items)?;
        let subtotal = order_subtotal(&items)?;
        let totals = OrderTotals::new(subtotal, Decimal::ZERO, Decimal::ZERO);

        let mut attempt = 1;
        let order = loop {
            let new_order = NewOrder {
                id: generate_order_number(),
                user_id: input.user_id.clone(),
                customer: input.customer.clone(),
                totals,
                notes: input.notes.clone(),
            };

            match self.store.create(new_order, items.clone()).await {
                Ok(order) => break order,
                Err(RepositoryError::Conflict(reason)) if attempt < ORDER_NUMBER_ATTEMPTS => {
                    warn!(attempt, reason = %reason, "Order number collision, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        info!(order_id = %order.id, total = %order.totals.total(), "Order created");

        spawn_notification(
            Arc::clone(&self.notifier),
            Notification::OrderPlaced {
                order: order.clone(),
                items,
            },
        );

        Ok(order)
    }

    /// Get an order with its line items.
    ///
    /// # Errors
    ///
    /// Returns store errors unchanged.
    pub async fn get_order(
        &self,
        order_id: &OrderNumber,
    ) -> Result<Option<OrderWithItems>, BillingError> {
        Ok(self.store.find_by_id_with_items(order_id).await?)
    }

    /// Get an order's audit trail, newest first.
    ///
    /// # Errors
    ///
    /// Returns store errors unchanged.
    pub async fn get_order_events(
        &self,
        order_id: &OrderNumber,
    ) -> Result<Vec<OrderEvent>, BillingError> {
        Ok(self.store.events_by_order_id(order_id).await?)
    }

    /// Get an account's order history, newest first.
    ///
    /// # Errors
    ///
    /// Returns store errors unchanged.
    pub async fn get_user_orders(&self, user_id: &UserId) -> Result<Vec<Order>, BillingError> {
        Ok(self.store.find_by_user_id(user_id).await?)
    }

    /// Get the events across all of an account's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns store errors unchanged.
    pub async fn get_user_activity(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<OrderEvent>, BillingError> {
        Ok(self.store.events_by_user_id(user_id).await?)
    }

    /// Start paying for an order.
    ///
    /// Moves the order to `processing` before contacting the provider and
    /// records the provider's payment id when one is returned. The provider's
    /// response is returned as-is, including rejections.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::InvalidUrl`] if `base_url` is not a URL, and
    /// store and provider errors unchanged.
    #[instrument(skip(self, base_url), fields(order_id = %order_id))]
    pub async fn initiate_payment(
        &self,
        order_id: &OrderNumber,
        base_url: &str,
    ) -> Result<PaymentResponse, BillingError> {
        let Some(order) = self.store.find_by_id(order_id).await? else {
            return Ok(PaymentResponse::failure("Order not found"));
        };

        let base = base_url.trim_end_matches('/');
        let return_url = with_order_id(&format!("{base}/checkout/success"), order_id)?;
        let cancel_url = with_order_id(&format!("{base}/checkout/cancel"), order_id)?;
        let notify_url = Url::parse(&format!("{base}/api/webhooks/payment"))?;

        self.update_order_status(order_id, OrderStatus::Processing, None, None)
            .await?;

        let mut metadata = BTreeMap::new();
        metadata.insert("order_id".to_owned(), order.id.to_string());
        if let Some(user_id) = &order.user_id {
            metadata.insert("user_id".to_owned(), user_id.to_string());
        }

        let request = PaymentRequest {
            order_id: order.id.clone(),
            amount: Money::new(order.totals.total(), self.settings.currency),
            description: format!("{} order {}", self.settings.store_name, order.id),
            customer: PaymentCustomer {
                first_name: order.customer.first_name.clone(),
                last_name: order.customer.last_name.clone(),
                email: order.customer.email.clone(),
                phone: order.customer.phone.clone(),
            },
            return_url,
            cancel_url,
            notify_url,
            metadata,
        };

        let response = self.provider.initiate_payment(&request).await?;

        if response.success {
            if let Some(payment_id) = &response.payment_id {
                self.store
                    .update_payment(order_id, payment_id, self.provider.name())
                    .await?;
            }
            info!(provider = self.provider.name(), "Payment initiated");
        } else {
            warn!(
                provider = self.provider.name(),
                error = response.error.as_deref().unwrap_or("unknown"),
                "Payment initiation rejected"
            );
        }

        Ok(response)
    }

    /// Handle the payer returning from a successful payment.
    ///
    /// If the provider confirms the payment is complete the order becomes
    /// `paid` and the payment confirmation is sent; otherwise it is left as
    /// it is. Calling this again for the same payment is safe: the order is
    /// only confirmed to the customer once.
    ///
    /// # Errors
    ///
    /// Returns store and provider errors unchanged.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn handle_payment_success(
        &self,
        order_id: &OrderNumber,
        payment_id: &str,
    ) -> Result<Option<Order>, BillingError> {
        let Some(order) = self.store.find_by_id(order_id).await? else {
            error!("Payment success for unknown order");
            return Ok(None);
        };

        let verification = self.provider.verify_payment(payment_id, order_id).await?;

        if verification.status != PaymentStatus::Complete {
            warn!(
                status = %verification.status,
                error = verification.error.as_deref().unwrap_or(""),
                "Payment not confirmed, order left unchanged"
            );
            return Ok(Some(order));
        }

        let Some((previous, paid)) = self
            .transition_status(
                order_id,
                OrderStatus::Paid,
                Some(event_types::PAYMENT_COMPLETED),
                Some(&format!("Payment {payment_id} completed")),
            )
            .await?
        else {
            return Ok(None);
        };

        if previous != OrderStatus::Paid {
            spawn_notification(
                Arc::clone(&self.notifier),
                Notification::PaymentReceived {
                    order: paid.clone(),
                },
            );
        }

        Ok(Some(paid))
    }

    /// Handle the payer abandoning payment. The order becomes `cancelled`
    /// whatever its current status.
    ///
    /// # Errors
    ///
    /// Returns store errors unchanged.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn handle_payment_cancellation(
        &self,
        order_id: &OrderNumber,
    ) -> Result<Option<Order>, BillingError> {
        self.update_order_status(order_id, OrderStatus::Cancelled, None, None)
            .await
    }

    /// Apply an asynchronous payment notification.
    ///
    /// The signature is taken from `signature` or, failing that, from the
    /// payload's own `signature` field. Returns `false` without touching the
    /// order when the signature does not match, when the provider requires a
    /// signature and none was sent, or when the order is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::MalformedWebhook`] (wrapped) if the payload
    /// lacks required fields, and store errors unchanged.
    #[instrument(skip(self, payload, signature))]
    pub async fn process_webhook(
        &self,
        payload: &Value,
        signature: Option<&str>,
    ) -> Result<bool, BillingError> {
        let signature = signature.or_else(|| payload.get(SIGNATURE_FIELD).and_then(Value::as_str));

        match signature {
            Some(sig) if !self.provider.validate_webhook_signature(payload, sig) => {
                error!(provider = self.provider.name(), "Webhook signature mismatch");
                return Ok(false);
            }
            None if !self.provider.accepts_unsigned_webhooks() => {
                error!(provider = self.provider.name(), "Unsigned webhook rejected");
                return Ok(false);
            }
            _ => {}
        }

        let notification = self.provider.process_webhook(payload)?;
        let status = order_status_for_payment(notification.status);
        let reported = notification.status.map_or("unknown", PaymentStatus::as_str);

        let updated = self
            .transition_status(
                &notification.order_id,
                status,
                None,
                Some(&format!(
                    "Payment {} reported {reported} by {}",
                    notification.payment_id,
                    self.provider.name()
                )),
            )
            .await?;

        let Some((previous, order)) = updated else {
            warn!(order_id = %notification.order_id, "Webhook for unknown order");
            return Ok(false);
        };

        info!(order_id = %order.id, status = %status, "Webhook applied");

        if status == OrderStatus::Paid && previous != OrderStatus::Paid {
            spawn_notification(
                Arc::clone(&self.notifier),
                Notification::PaymentReceived { order },
            );
        }

        Ok(true)
    }

    /// Set an order's status. Every status change goes through here.
    ///
    /// `event_type` and `description` default to the store's status-change
    /// wording.
    ///
    /// # Errors
    ///
    /// Returns store errors unchanged.
    #[instrument(skip(self, event_type, description), fields(order_id = %order_id, status = %status))]
    pub async fn update_order_status(
        &self,
        order_id: &OrderNumber,
        status: OrderStatus,
        event_type: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Order>, BillingError> {
        Ok(self
            .transition_status(order_id, status, event_type, description)
            .await?
            .map(|(_, order)| order))
    }

    /// Move an order to `status` from the status it is read in, returning
    /// that previous status with the updated order.
    ///
    /// The write only lands if nobody changed the status in between; a lost
    /// race is retried against the fresh status.
    async fn transition_status(
        &self,
        order_id: &OrderNumber,
        status: OrderStatus,
        event_type: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<(OrderStatus, Order)>, BillingError> {
        for _ in 0..STATUS_UPDATE_ATTEMPTS {
            let Some(current) = self.store.find_by_id(order_id).await? else {
                return Ok(None);
            };

            if !current.status.is_standard_transition(status) {
                warn!(
                    from = %current.status,
                    to = %status,
                    "Order status change outside the usual lifecycle"
                );
            }

            if let Some(updated) = self
                .store
                .update_status_from(order_id, current.status, status, event_type, description)
                .await?
            {
                return Ok(Some((current.status, updated)));
            }

            warn!(from = %current.status, "Order status changed concurrently, retrying");
        }

        Err(RepositoryError::Conflict(format!("status of order {order_id} kept changing")).into())
    }

    /// One page of orders for the admin list, without line items.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::InvalidStatus`] for an unknown status filter,
    /// and store errors unchanged.
    pub async fn get_admin_orders(
        &self,
        page: u32,
        limit: u32,
        status: Option<&str>,
    ) -> Result<OrderList, BillingError> {
        let status = parse_status_filter(status)?;
        Ok(self
            .store
            .list(OrderQuery::new(page, limit, status))
            .await?)
    }

    /// Refund an order's payment, in full or in part.
    ///
    /// On success the order becomes `refunded`. A provider that requires a
    /// manual refund leaves the order as it is. Returns `None` if the order
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns store and provider errors unchanged.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn refund_order(
        &self,
        order_id: &OrderNumber,
        amount: Option<Decimal>,
    ) -> Result<Option<RefundResponse>, BillingError> {
        let Some(order) = self.store.find_by_id(order_id).await? else {
            return Ok(None);
        };

        let Some(payment_id) = order.payment_id.as_deref() else {
            return Ok(Some(RefundResponse {
                success: false,
                error: Some("Order has no recorded payment".to_owned()),
            }));
        };

        if let Some(amount) = amount
            && (amount <= Decimal::ZERO || amount > order.totals.total())
        {
            return Ok(Some(RefundResponse {
                success: false,
                error: Some("Refund amount must be positive and at most the order total".to_owned()),
            }));
        }

        let response = self.provider.refund_payment(payment_id, amount).await?;

        if response.success {
            let refunded = amount.unwrap_or_else(|| order.totals.total());
            self.update_order_status(
                order_id,
                OrderStatus::Refunded,
                Some(event_types::PAYMENT_REFUNDED),
                Some(&format!("Refunded {refunded:.2} of payment {payment_id}")),
            )
            .await?;
        } else {
            warn!(
                error = response.error.as_deref().unwrap_or("unknown"),
                "Refund not processed by provider"
            );
        }

        Ok(Some(response))
    }
}

fn with_order_id(url: &str, order_id: &OrderNumber) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(url)?;
    url.query_pairs_mut().append_pair("orderId", order_id.as_str());
    Ok(url)
}
