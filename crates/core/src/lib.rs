//! WallCraft Core - Shared types library.
//!
//! This crate provides common types used across all WallCraft components:
//! - `storefront` - Checkout, payment reconciliation, and download delivery
//! - `cli` - Command-line tools for migrations, users, and catalog seeding
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, prices, emails, order
//!   numbers, and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
