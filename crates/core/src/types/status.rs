//! Order and payment status enums.
//!
//! `OrderStatus` is the billing lifecycle:
//!
//! ```text
//! pending -> processing -> paid -> shipped -> delivered
//!     \           \          \        \          \
//!      +-----------+----------+--------+----------+--> cancelled | refunded
//! ```
//!
//! `PaymentStatus` is the normalized outcome reported by a payment provider.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "billing.order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, awaiting payment.
    #[default]
    Pending,
    /// Payment has been initiated with the provider.
    Processing,
    /// Payment confirmed.
    Paid,
    /// Handed to the courier.
    Shipped,
    /// Received by the customer.
    Delivered,
    /// Abandoned, declined or cancelled by the payer.
    Cancelled,
    /// Money returned to the payer.
    Refunded,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::Processing,
        Self::Paid,
        Self::Shipped,
        Self::Delivered,
        Self::Cancelled,
        Self::Refunded,
    ];

    /// The snake_case name used on the wire, in Postgres and in event types.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    /// Whether no further lifecycle step follows this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Refunded)
    }

    /// Whether moving from `self` to `next` follows the documented lifecycle.
    ///
    /// Re-applying the current status counts as a standard transition, so
    /// repeated callbacks for the same payment are not flagged.
    ///
    /// Billing does not reject non-standard transitions; callers use this to
    /// log them.
    #[must_use]
    pub const fn is_standard_transition(self, next: Self) -> bool {
        if self as u8 == next as u8 {
            return true;
        }
        match self {
            Self::Pending => matches!(next, Self::Processing | Self::Cancelled),
            Self::Processing => matches!(next, Self::Pending | Self::Paid | Self::Cancelled),
            Self::Paid => matches!(next, Self::Shipped | Self::Cancelled | Self::Refunded),
            Self::Shipped => matches!(next, Self::Delivered | Self::Refunded),
            Self::Delivered => matches!(next, Self::Refunded),
            Self::Cancelled | Self::Refunded => false,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid order status: {s}"))
    }
}

/// Payment outcome as normalized from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Complete,
    Pending,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    /// Map a provider outcome onto the order lifecycle.
    #[must_use]
    pub const fn order_status(self) -> OrderStatus {
        match self {
            Self::Complete => OrderStatus::Paid,
            Self::Pending => OrderStatus::Processing,
            Self::Failed | Self::Cancelled => OrderStatus::Cancelled,
        }
    }

    /// Parse a gateway's status string, case-insensitively.
    ///
    /// Returns `None` for statuses billing does not know; those orders are
    /// treated as still processing.
    #[must_use]
    pub fn from_gateway(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "complete" | "completed" => Some(Self::Complete),
            "pending" => Some(Self::Pending),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// The snake_case name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Pending => "pending",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an optional provider status onto the order lifecycle.
///
/// Unknown statuses default to [`OrderStatus::Processing`].
#[must_use]
pub fn order_status_for_payment(status: Option<PaymentStatus>) -> OrderStatus {
    status.map_or(OrderStatus::Processing, PaymentStatus::order_status)
}
