//! Type-safe price representation using decimal arithmetic.
//!
//! Prices are stored in the currency's standard unit (e.g. dollars, rupees).
//! Payment providers want integer amounts in the smallest unit instead
//! (cents, paise), so [`Price::to_minor_units`] performs that conversion
//! with half-up rounding.

use core::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when converting a [`Price`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PriceError {
    /// Unknown ISO 4217 currency code.
    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// Amount is negative.
    #[error("price cannot be negative")]
    Negative,

    /// Amount does not fit in an `i64` of minor units.
    #[error("price is too large to convert to minor units")]
    Overflow,
}

/// A price with currency information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in the currency's standard unit (e.g., dollars, not cents).
    pub amount: Decimal,
    /// Currency code.
    pub currency_code: CurrencyCode,
}

impl Price {
    /// Create a new price.
    #[must_use]
    pub const fn new(amount: Decimal, currency_code: CurrencyCode) -> Self {
        Self {
            amount,
            currency_code,
        }
    }

    /// Convert to an integer amount in the currency's minor unit.
    ///
    /// Rounds half away from zero, so `2.995` USD becomes `300` cents.
    ///
    /// # Errors
    ///
    /// Returns `PriceError::Negative` for negative amounts and
    /// `PriceError::Overflow` if the result does not fit in an `i64`.
    pub fn to_minor_units(&self) -> Result<i64, PriceError> {
        if self.amount.is_sign_negative() && !self.amount.is_zero() {
            return Err(PriceError::Negative);
        }

        let scale = Decimal::from(10_i64.pow(self.currency_code.minor_unit_exponent()));
        let scaled = self
            .amount
            .checked_mul(scale)
            .ok_or(PriceError::Overflow)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);

        i64::try_from(scaled).map_err(|_| PriceError::Overflow)
    }

    /// Convert this price into another currency at `rate` target units per
    /// source unit, keeping the target currency's decimal precision.
    ///
    /// # Errors
    ///
    /// Returns `PriceError::Overflow` if the product is out of range.
    pub fn convert(&self, target: CurrencyCode, rate: Decimal) -> Result<Self, PriceError> {
        let amount = self
            .amount
            .checked_mul(rate)
            .ok_or(PriceError::Overflow)?
            .round_dp_with_strategy(
                target.minor_unit_exponent(),
                RoundingStrategy::MidpointAwayFromZero,
            );
        Ok(Self::new(amount, target))
    }

    /// Format for display (e.g., "$19.99").
    #[must_use]
    pub fn display(&self) -> String {
        format!(
            "{}{:.prec$}",
            self.currency_code.symbol(),
            self.amount,
            prec = self.currency_code.minor_unit_exponent() as usize
        )
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Currency codes accepted by the storefront.
///
/// `USDT` is not ISO 4217 but is treated as a two-decimal currency for
/// crypto checkout quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    INR,
    USDT,
}

impl CurrencyCode {
    /// Three or four letter code (e.g. "USD").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
            Self::INR => "INR",
            Self::USDT => "USDT",
        }
    }

    /// Display symbol.
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::USD => "$",
            Self::EUR => "€",
            Self::GBP => "£",
            Self::INR => "₹",
            Self::USDT => "₮",
        }
    }

    /// Number of decimal digits in the minor unit.
    #[must_use]
    pub const fn minor_unit_exponent(&self) -> u32 {
        2
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = PriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Self::USD),
            "EUR" => Ok(Self::EUR),
            "GBP" => Ok(Self::GBP),
            "INR" => Ok(Self::INR),
            "USDT" => Ok(Self::USDT),
            other => Err(PriceError::UnsupportedCurrency(other.to_owned())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn usd(s: &str) -> Price {
        Price::new(Decimal::from_str(s).unwrap(), CurrencyCode::USD)
    }

    #[test]
    fn test_minor_units_exact() {
        assert_eq!(usd("2.99").to_minor_units().unwrap(), 299);
        assert_eq!(usd("0").to_minor_units().unwrap(), 0);
    }

    #[test]
    fn test_minor_units_round_half_up() {
        assert_eq!(usd("2.995").to_minor_units().unwrap(), 300);
        assert_eq!(usd("2.994").to_minor_units().unwrap(), 299);
        assert_eq!(usd("0.005").to_minor_units().unwrap(), 1);
    }

    #[test]
    fn test_minor_units_negative() {
        assert_eq!(usd("-1.00").to_minor_units(), Err(PriceError::Negative));
    }

    #[test]
    fn test_convert_rounds_to_target_precision() {
        let inr = usd("2.99")
            .convert(CurrencyCode::INR, Decimal::from_str("83.125").unwrap())
            .unwrap();
        assert_eq!(inr.currency_code, CurrencyCode::INR);
        assert_eq!(inr.amount, Decimal::from_str("248.54").unwrap());
    }

    #[test]
    fn test_convert_overflow() {
        let huge = Price::new(Decimal::MAX, CurrencyCode::USD);
        assert!(matches!(
            huge.convert(CurrencyCode::INR, Decimal::TWO),
            Err(PriceError::Overflow)
        ));
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!("inr".parse::<CurrencyCode>().unwrap(), CurrencyCode::INR);
        assert!(matches!(
            "BTC".parse::<CurrencyCode>(),
            Err(PriceError::UnsupportedCurrency(_))
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(usd("2.9").display(), "$2.90");
    }
}
