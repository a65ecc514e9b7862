//! Rate limiting.
//!
//! Two layers:
//! - [`burst_rate_limiter`]: coarse per-IP token bucket (`tower_governor`)
//!   on public endpoints that carry no session, such as webhooks and
//!   download links.
//! - [`enforce`]: the fixed-window [`RateLimiter`] guard with named
//!   budgets, called from handlers with a route-specific key.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{Extensions, HeaderMap, Request, request::Parts};
use governor::clock::QuantaInstant;
use governor::middleware::NoOpMiddleware;
use tower_governor::{GovernorError, GovernorLayer, governor::GovernorConfigBuilder};
use tracing::debug;

use crate::error::AppError;
use crate::services::guard::{RateLimit, RateLimiter};

/// Best guess at the client IP from proxy headers.
///
/// Checks Cloudflare's `CF-Connecting-IP` first, then `X-Forwarded-For`
/// (first hop), `X-Real-IP` and `Fly-Client-IP`.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    header("cf-connecting-ip")
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            header("x-forwarded-for")
                .and_then(|s| s.split(',').next())
                .and_then(|s| s.trim().parse().ok())
        })
        .or_else(|| header("x-real-ip").and_then(|s| s.trim().parse().ok()))
        .or_else(|| header("fly-client-ip").and_then(|s| s.trim().parse().ok()))
}

/// [`client_ip`], or the socket peer when the server records connect info.
fn request_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
    client_ip(headers).or_else(|| {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

/// Extractor for the caller's IP: proxy headers first, then the peer address.
///
/// `None` only when neither is available, e.g. a router driven without
/// `into_make_service_with_connect_info`.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub Option<IpAddr>);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(request_ip(&parts.headers, &parts.extensions)))
    }
}

/// Rate limit key for `scope` and the caller's IP.
///
/// Callers with no known IP share one bucket per scope.
#[must_use]
pub fn ip_key(scope: &str, ip: Option<IpAddr>) -> String {
    ip.map_or_else(|| format!("{scope}:unknown"), |ip| format!("{scope}:{ip}"))
}

/// Count a request against `key` under `limit`.
///
/// # Errors
///
/// Returns `AppError::RateLimited` with the seconds until the window resets.
pub fn enforce(limiter: &dyn RateLimiter, key: &str, limit: RateLimit) -> Result<(), AppError> {
    let decision = limiter.check_rate_limit(key, limit);
    if decision.allowed {
        return Ok(());
    }

    debug!(key, reset_in_secs = decision.reset_in.num_seconds(), "Rate limited");
    Err(AppError::RateLimited {
        retry_after_secs: decision.reset_in.num_seconds().max(1),
    })
}

// =============================================================================
// Token bucket layer
// =============================================================================

/// Key extractor for `tower_governor` using [`client_ip`], falling back to
/// the peer address when the server records connect info.
#[derive(Clone, Copy)]
pub struct CloudflareIpKeyExtractor;

impl tower_governor::key_extractor::KeyExtractor for CloudflareIpKeyExtractor {
    type Key = IpAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        request_ip(req.headers(), req.extensions()).ok_or(GovernorError::UnableToExtractKey)
    }
}

/// Rate limiter layer type for Axum.
pub type RateLimiterLayer =
    GovernorLayer<CloudflareIpKeyExtractor, NoOpMiddleware<QuantaInstant>, axum::body::Body>;

/// Burst limiter for unauthenticated endpoints: ~60 requests per minute per
/// IP with bursts of 30.
///
/// # Panics
///
/// This function will not panic. The configuration uses only valid positive
/// integers (`per_second(1)` and `burst_size(30)`), which are always accepted
/// by `GovernorConfigBuilder`.
#[must_use]
pub fn burst_rate_limiter() -> RateLimiterLayer {
    let config = GovernorConfigBuilder::default()
        .key_extractor(CloudflareIpKeyExtractor)
        .per_second(1)
        .burst_size(30)
        .finish()
        .expect("rate limiter config with per_second(1) and burst_size(30) is valid");
    GovernorLayer::new(Arc::new(config))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::services::clock::ManualClock;
    use crate::services::guard::MemoryGuard;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_client_ip_precedence() {
        let h = headers(&[
            ("x-forwarded-for", "203.0.113.9, 10.0.0.1"),
            ("cf-connecting-ip", "198.51.100.4"),
        ]);
        assert_eq!(client_ip(&h), Some("198.51.100.4".parse().unwrap()));

        let h = headers(&[("x-forwarded-for", "203.0.113.9, 10.0.0.1")]);
        assert_eq!(client_ip(&h), Some("203.0.113.9".parse().unwrap()));

        let h = headers(&[("x-real-ip", "not-an-ip"), ("fly-client-ip", "2001:db8::1")]);
        assert_eq!(client_ip(&h), Some("2001:db8::1".parse().unwrap()));

        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn test_ip_key() {
        assert_eq!(
            ip_key("login", Some("203.0.113.9".parse().unwrap())),
            "login:203.0.113.9"
        );
        assert_eq!(ip_key("login", None), "login:unknown");
    }

    #[test]
    fn test_request_ip_falls_back_to_peer() {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 1], 4000))));

        assert_eq!(
            request_ip(&HeaderMap::new(), &extensions),
            Some("198.51.100.1".parse().unwrap())
        );
        let h = headers(&[("x-real-ip", "203.0.113.9")]);
        assert_eq!(request_ip(&h, &extensions), Some("203.0.113.9".parse().unwrap()));
        assert_eq!(request_ip(&HeaderMap::new(), &Extensions::new()), None);
    }

    #[test]
    fn test_enforce_reports_retry_after() {
        let guard = MemoryGuard::new(Arc::new(ManualClock::default()));
        for _ in 0..3 {
            enforce(&guard, "signup:1.2.3.4", RateLimit::SIGNUP).unwrap();
        }
        let err = enforce(&guard, "signup:1.2.3.4", RateLimit::SIGNUP).unwrap_err();
        assert!(matches!(err, AppError::RateLimited { retry_after_secs: 60 }));
    }
}
