//! HTTP middleware stack for the storefront.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layer (capture errors)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//! 4. Session layer (tower-sessions with `PostgreSQL` store)
//! 5. Burst rate limiting on public endpoints (governor)
//!
//! Fixed-window limits are enforced inside handlers via [`enforce`].

pub mod auth;
pub mod rate_limit;
pub mod request_id;
pub mod session;

pub use auth::{OptionalAuth, RequireAdmin, RequireAuth, clear_current_user, set_current_user};
pub use rate_limit::{ClientIp, RateLimiterLayer, burst_rate_limiter, client_ip, enforce, ip_key};
pub use request_id::request_id_middleware;
pub use session::{create_session_layer, postgres_session_store};
