//! Domain models for billing.
//!
//! These are validated domain objects, separate from the database row types
//! in [`crate::db`].

pub mod order;

pub use order::{
    CustomerDetails, NewOrder, NewOrderItem, Order, OrderEvent, OrderItem, OrderList, OrderQuery,
    OrderTotals, OrderWithItems, event_types,
};
