//! Business logic services for billing.
//!
//! # Services
//!
//! - `billing` - Order creation, payment handling and status changes
//! - `notify` - Order and payment confirmations to customers
//! - `order_number` - Human-readable order numbers

pub mod billing;
pub mod notify;
pub mod order_number;

pub use billing::{
    BillingError, BillingService, CheckoutSettings, CreateOrderInput, MAX_ITEM_QUANTITY,
    MAX_ORDER_AMOUNT, OrderItemInput,
};
pub use notify::{
    EmailNotifier, LogNotifier, Notification, NotifyError, OrderNotifier, spawn_notification,
};
pub use order_number::generate_order_number;
