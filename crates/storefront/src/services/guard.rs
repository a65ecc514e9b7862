//! Fixed-window rate limiting and failed-login lockout.
//!
//! State lives in process memory and is best-effort: it resets on restart
//! and is not shared between replicas. Expired entries are swept lazily,
//! at most once per [`CLEANUP_INTERVAL`], from inside the public calls.
//!
//! Callers depend on the [`RateLimiter`] and [`LoginLockout`] traits so a
//! shared backend can replace [`MemoryGuard`] without touching handlers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};

/// Minimum time between sweeps of expired entries.
pub const CLEANUP_INTERVAL: Duration = Duration::minutes(5);
/// Consecutive failures that lock an account.
pub const MAX_FAILED_LOGINS: u32 = 5;
/// How long a locked account stays locked.
pub const LOCKOUT_DURATION: Duration = Duration::minutes(15);
/// How long lockout records are kept after the lock expires.
const LOCKOUT_RETENTION: Duration = Duration::hours(24);

/// A request budget per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimit {
    /// Login attempts: 5 per minute.
    pub const AUTH: Self = Self::per_minute(5);
    /// General API calls: 30 per minute.
    pub const API: Self = Self::per_minute(30);
    /// Account creation: 3 per minute.
    pub const SIGNUP: Self = Self::per_minute(3);

    #[must_use]
    pub const fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            window: Duration::minutes(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Time until the current window ends.
    pub reset_in: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutStatus {
    Unlocked,
    Locked { remaining: Duration },
}

impl LockoutStatus {
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

pub trait RateLimiter: Send + Sync {
    /// Count one request against `key` and report whether it is allowed.
    fn check_rate_limit(&self, key: &str, limit: RateLimit) -> RateLimitDecision;
}

pub trait LoginLockout: Send + Sync {
    /// Record a failed login and return the resulting lock state.
    fn record_failed_login(&self, email: &str) -> LockoutStatus;

    /// Forget all failures for `email` (successful login).
    fn clear_failed_logins(&self, email: &str);

    fn is_account_locked(&self, email: &str) -> LockoutStatus;
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
struct LoginAttempts {
    failed: u32,
    locked_until: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
}

struct GuardState {
    windows: HashMap<String, WindowEntry>,
    logins: HashMap<String, LoginAttempts>,
    last_cleanup: DateTime<Utc>,
}

/// In-memory implementation of both guard ports.
pub struct MemoryGuard {
    state: Mutex<GuardState>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryGuard {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryGuard {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            state: Mutex::new(GuardState {
                windows: HashMap::new(),
                logins: HashMap::new(),
                last_cleanup: now,
            }),
            clock,
        }
    }

    /// Number of tracked keys, across both maps.
    #[must_use]
    pub fn tracked_entries(&self) -> usize {
        let state = self.state.lock();
        state.windows.len() + state.logins.len()
    }

    fn cleanup(state: &mut GuardState, now: DateTime<Utc>) {
        if now - state.last_cleanup < CLEANUP_INTERVAL {
            return;
        }
        state.last_cleanup = now;

        let before = state.windows.len() + state.logins.len();
        state.windows.retain(|_, entry| now <= entry.reset_at);
        state.logins.retain(|_, attempts| {
            let anchor = attempts.locked_until.or(attempts.last_failure);
            anchor.is_none_or(|at| now <= at + LOCKOUT_RETENTION)
        });

        let swept = before - (state.windows.len() + state.logins.len());
        if swept > 0 {
            debug!(swept, "Swept expired guard entries");
        }
    }
}

impl RateLimiter for MemoryGuard {
    fn check_rate_limit(&self, key: &str, limit: RateLimit) -> RateLimitDecision {
        let now = self.clock.now();
        let mut state = self.state.lock();
        Self::cleanup(&mut state, now);

        match state.windows.get_mut(key) {
            Some(entry) if now <= entry.reset_at => {
                let reset_in = entry.reset_at - now;
                if entry.count >= limit.max_requests {
                    return RateLimitDecision {
                        allowed: false,
                        remaining: 0,
                        reset_in,
                    };
                }
                entry.count += 1;
                RateLimitDecision {
                    allowed: true,
                    remaining: limit.max_requests - entry.count,
                    reset_in,
                }
            }
            _ => {
                state.windows.insert(
                    key.to_owned(),
                    WindowEntry {
                        count: 1,
                        reset_at: now + limit.window,
                    },
                );
                RateLimitDecision {
                    allowed: limit.max_requests > 0,
                    remaining: limit.max_requests.saturating_sub(1),
                    reset_in: limit.window,
                }
            }
        }
    }
}

impl LoginLockout for MemoryGuard {
    fn record_failed_login(&self, email: &str) -> LockoutStatus {
        let now = self.clock.now();
        let mut state = self.state.lock();
        Self::cleanup(&mut state, now);

        let attempts = state.logins.entry(email.to_owned()).or_default();
        if attempts.locked_until.is_some_and(|until| now > until) {
            *attempts = LoginAttempts::default();
        }

        attempts.failed += 1;
        attempts.last_failure = Some(now);

        if attempts.failed >= MAX_FAILED_LOGINS {
            let until = now + LOCKOUT_DURATION;
            attempts.locked_until = Some(until);
            warn!(failed = attempts.failed, "Account locked after repeated login failures");
            return LockoutStatus::Locked {
                remaining: until - now,
            };
        }

        LockoutStatus::Unlocked
    }

    fn clear_failed_logins(&self, email: &str) {
        self.state.lock().logins.remove(email);
    }

    fn is_account_locked(&self, email: &str) -> LockoutStatus {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let Some(attempts) = state.logins.get_mut(email) else {
            return LockoutStatus::Unlocked;
        };
        match attempts.locked_until {
            Some(until) if now <= until => LockoutStatus::Locked {
                remaining: until - now,
            },
            Some(_) => {
                // Lock expired: start counting from zero again.
                *attempts = LoginAttempts::default();
                LockoutStatus::Unlocked
            }
            None => LockoutStatus::Unlocked,
        }
    }
}
