//! HTTP route handlers for the storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET   /health                          - Liveness
//! GET   /health/ready                    - Readiness (store ping)
//!
//! # Auth
//! POST  /api/auth/login                  - Password login
//! POST  /api/auth/signup                 - Create customer account
//! POST  /api/auth/logout                 - End session
//!
//! # Checkout (requires auth)
//! POST  /api/payments/create             - Create pending order, open provider transaction
//! POST  /api/payments/verify/razorpay    - Browser callback after the widget succeeds
//!
//! # Public (burst limited)
//! POST  /api/webhooks/razorpay           - Provider webhook (raw body, signed)
//! GET   /api/download/{token}            - Redeem download grant, 302 to file
//!
//! # Admin (requires admin)
//! PATCH /api/admin/orders/{id}           - Override payment status
//! POST  /api/admin/orders/{id}/resend    - Resend confirmation email
//! ```

pub mod admin;
pub mod auth;
pub mod downloads;
pub mod health;
pub mod payments;
pub mod webhooks;

use axum::Router;

use crate::middleware::RateLimiterLayer;
use crate::state::AppState;

/// Create all routes for the storefront.
///
/// `burst` is applied to the unauthenticated public routes when given.
pub fn routes(burst: Option<RateLimiterLayer>) -> Router<AppState> {
    let public = Router::new()
        .merge(webhooks::router())
        .merge(downloads::router());
    let public = match burst {
        Some(layer) => public.layer(layer),
        None => public,
    };

    Router::new()
        .merge(health::router())
        .merge(auth::router())
        .merge(payments::router())
        .merge(admin::router())
        .merge(public)
}
