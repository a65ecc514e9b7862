//! Authentication error types.

use chrono::Duration;
use thiserror::Error;

use crate::db::RepositoryError;

/// Errors that can occur during authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] wallcraft_core::EmailError),

    /// Invalid credentials (wrong password or user not found).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Too many consecutive failures for this email.
    #[error("account locked for another {minutes} minutes")]
    AccountLocked { minutes: i64 },

    /// User already exists.
    #[error("user already exists")]
    UserAlreadyExists,

    /// Password too weak or invalid.
    #[error("password validation failed: {0}")]
    WeakPassword(String),

    /// Display name too short.
    #[error("name must be at least 2 characters")]
    InvalidName,

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),

    /// Password hashing error.
    #[error("password hashing error")]
    PasswordHash,
}

/// Whole minutes left, rounded up so "0 minutes" is never shown.
#[must_use]
pub fn minutes_ceil(remaining: Duration) -> i64 {
    let secs = remaining.num_seconds().max(1);
    (secs + 59) / 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes_ceil() {
        assert_eq!(minutes_ceil(Duration::minutes(15)), 15);
        assert_eq!(minutes_ceil(Duration::seconds(61)), 2);
        assert_eq!(minutes_ceil(Duration::zero()), 1);
    }

    #[test]
    fn test_locked_message_names_minutes() {
        let err = AuthError::AccountLocked {
            minutes: minutes_ceil(Duration::seconds(14 * 60 + 5)),
        };
        assert_eq!(err.to_string(), "account locked for another 15 minutes");
    }
}
