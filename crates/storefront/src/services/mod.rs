//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `auth` - Password accounts with per-email lockout
//! - `checkout` - Pending order creation and provider hand-off
//! - `clock` - Injectable wall clock
//! - `entitlements` - Download grant issuance and redemption
//! - `files` - Signed URLs for private wallpaper files
//! - `guard` - Fixed-window rate limiting and login lockout
//! - `notifications` - Order confirmation email
//! - `orders` - Order ledger and payment status state machine
//! - `payments` - Razorpay and USDT gateway adapters
//! - `reconciliation` - Idempotent finalization from callbacks, webhooks
//!   and admin overrides
//! - `signing` - HMAC-SHA256 hex signatures

pub mod auth;
pub mod checkout;
pub mod clock;
pub mod entitlements;
pub mod files;
pub mod guard;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod reconciliation;
pub mod signing;
