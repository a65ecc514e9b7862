//! Human-readable order numbers.
//!
//! Format: `WC-YYMMDD-XXXXXX` where the suffix is six characters drawn from
//! an alphabet without look-alike glyphs (no `0/O`, `1/I/L`). Uniqueness is
//! enforced by the store; callers regenerate on collision.

use core::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

const PREFIX: &str = "WC";
const SUFFIX_LEN: usize = 6;
const ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

/// Errors that can occur when parsing an [`OrderNumber`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed order number: {0}")]
pub struct OrderNumberError(String);

/// Unique, customer-facing order reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Generate a new order number stamped with `now`'s date.
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| {
                let idx = rng.random_range(0..ALPHABET.len());
                char::from(ALPHABET.get(idx).copied().unwrap_or(b'X'))
            })
            .collect();

        Self(format!("{PREFIX}-{}-{suffix}", now.format("%y%m%d")))
    }

    /// Parse an order number received from a client or the database.
    ///
    /// # Errors
    ///
    /// Returns `OrderNumberError` if the value does not match the
    /// `WC-YYMMDD-XXXXXX` shape.
    pub fn parse(s: &str) -> Result<Self, OrderNumberError> {
        let mut parts = s.split('-');
        let valid = matches!(
            (parts.next(), parts.next(), parts.next(), parts.next()),
            (Some(PREFIX), Some(date), Some(suffix), None)
                if date.len() == 6
                    && date.bytes().all(|b| b.is_ascii_digit())
                    && suffix.len() == SUFFIX_LEN
                    && suffix.bytes().all(|b| ALPHABET.contains(&b))
        );

        if valid {
            Ok(Self(s.to_owned()))
        } else {
            Err(OrderNumberError(s.to_owned()))
        }
    }

    /// Returns the order number as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(feature = "postgres")]
pg_text!(OrderNumber);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_generate_shape() {
        let now = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        let number = OrderNumber::generate(now);
        assert!(number.as_str().starts_with("WC-260307-"));
        assert!(OrderNumber::parse(number.as_str()).is_ok());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(OrderNumber::parse("WC-260307-ABC").is_err());
        assert!(OrderNumber::parse("XX-260307-ABCDEF").is_err());
        assert!(OrderNumber::parse("WC-26030A-ABCDEF").is_err());
        assert!(OrderNumber::parse("WC-260307-ABCDE0").is_err());
    }
}
