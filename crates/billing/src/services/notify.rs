//! Customer notifications.
//!
//! Notifications are a side effect of billing, never part of it: they are
//! dispatched with [`spawn_notification`], which returns immediately, and a
//! delivery failure is logged rather than reported to the caller.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::header::ContentType,
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::{error, info};

use crate::config::EmailConfig;
use crate::models::{NewOrderItem, Order};

/// Something worth telling the customer about.
#[derive(Debug, Clone)]
pub enum Notification {
    /// Sent after checkout creates the order.
    OrderPlaced {
        order: Order,
        items: Vec<NewOrderItem>,
    },
    /// Sent after a verified payment marks the order paid.
    PaymentReceived { order: Order },
}

impl Notification {
    #[must_use]
    pub const fn order(&self) -> &Order {
        match self {
            Self::OrderPlaced { order, .. } | Self::PaymentReceived { order } => order,
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::OrderPlaced { .. } => "order_placed",
            Self::PaymentReceived { .. } => "payment_received",
        }
    }

    /// Email subject line.
    #[must_use]
    pub fn subject(&self, store_name: &str) -> String {
        match self {
            Self::OrderPlaced { order, .. } => {
                format!("{store_name}: order {} received", order.id)
            }
            Self::PaymentReceived { order } => {
                format!("{store_name}: payment received for order {}", order.id)
            }
        }
    }

    /// Plain-text email body.
    #[must_use]
    pub fn body(&self, store_name: &str) -> String {
        let order = self.order();
        let mut body = format!("Hi {},\n\n", order.customer.first_name);

        match self {
            Self::OrderPlaced { items, .. } => {
                let _ = writeln!(body, "Thank you for your order {}.\n", order.id);
                for item in items {
                    let _ = writeln!(
                        body,
                        "  {} x {} @ {:.2} = {:.2}",
                        item.quantity, item.product_title, item.unit_price, item.total_price
                    );
                }
                let _ = writeln!(body, "\nTotal: {:.2}", order.totals.total());
                body.push_str("\nWe will let you know as soon as your payment is confirmed.\n");
            }
            Self::PaymentReceived { .. } => {
                let _ = writeln!(
                    body,
                    "We have received your payment of {:.2} for order {}.",
                    order.totals.total(),
                    order.id
                );
                body.push_str("Your order is now being prepared.\n");
            }
        }

        let _ = write!(body, "\n{store_name}\n");
        body
    }
}

/// Errors that can occur when delivering a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),
}

/// Delivers notifications to customers.
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Deliver a notification in the background.
///
/// Returns immediately. Failures are logged at `error` and go no further.
pub fn spawn_notification(notifier: Arc<dyn OrderNotifier>, notification: Notification) {
    tokio::spawn(async move {
        let order_id = notification.order().id.clone();
        match notifier.send(&notification).await {
            Ok(()) => info!(order_id = %order_id, kind = notification.kind(), "Notification sent"),
            Err(e) => error!(
                order_id = %order_id,
                kind = notification.kind(),
                error = %e,
                "Failed to send notification"
            ),
        }
    });
}

/// Sends notifications as plain-text email over SMTP.
#[derive(Clone)]
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
    store_name: String,
}

impl EmailNotifier {
    /// Create a new email notifier from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the SMTP relay cannot be configured.
    pub fn new(config: &EmailConfig, store_name: impl Into<String>) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_string(),
        );

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
            store_name: store_name.into(),
        })
    }
}

#[async_trait]
impl OrderNotifier for EmailNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let to = notification.order().customer.email.as_str();

        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| NotifyError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(to
                .parse()
                .map_err(|_| NotifyError::InvalidAddress(to.to_string()))?)
            .subject(notification.subject(&self.store_name))
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body(&self.store_name))?;

        self.mailer.send(email).await?;

        info!(to = %to, kind = notification.kind(), "Email sent successfully");
        Ok(())
    }
}

/// Logs notifications instead of sending them. Used when SMTP is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl OrderNotifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let order = notification.order();
        info!(
            order_id = %order.id,
            to = %order.customer.email,
            kind = notification.kind(),
            "Email delivery not configured, notification logged only"
        );
        Ok(())
    }
}
