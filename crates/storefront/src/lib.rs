//! WallCraft storefront library.
//!
//! Checkout, payment reconciliation and download delivery for the wallpaper
//! store, exposed as a library so the binary, CLI and integration tests
//! share one wiring.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::{Router, http::Request};
use tower_http::trace::TraceLayer;
use tower_sessions::{SessionManagerLayer, SessionStore};

use middleware::{RateLimiterLayer, request_id_middleware};
use state::AppState;

/// Build the application router with sessions, request ids and tracing.
///
/// Sentry layers are added by the binary around the result.
pub fn app<S>(
    state: AppState,
    sessions: SessionManagerLayer<S>,
    burst: Option<RateLimiterLayer>,
) -> Router
where
    S: SessionStore + Clone,
{
    Router::new()
        .merge(routes::routes(burst))
        .layer(sessions)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = tracing::field::Empty,
                )
            }),
        )
        .with_state(state)
}
