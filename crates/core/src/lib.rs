//! Gallery Core - Shared types library.
//!
//! This crate provides the domain types shared by the Gallery components:
//! - `billing` - Order lifecycle, payment providers and the billing API
//! - `cli` - Command-line tools for migrations and order inspection
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no database access,
//! no HTTP clients. Database encoding is available behind the `postgres`
//! feature.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, money, emails and order/payment statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
