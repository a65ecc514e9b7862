//! Status and classification enums shared by the storefront and CLI.

use serde::{Deserialize, Serialize};

/// Payment status of an order.
///
/// Every order starts `Pending` and moves to exactly one terminal state.
/// There is no path out of `Failed`; a buyer who wants to retry starts a
/// new checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "storefront.payment_status", rename_all = "snake_case")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> target` is a legal transition.
    ///
    /// Repeating the current terminal status counts as legal so that
    /// duplicate confirmations are idempotent.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Completed | Self::Failed)
                | (Self::Completed, Self::Completed)
                | (Self::Failed, Self::Failed)
        )
    }

    /// Wire/display name (e.g. `COMPLETED`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the buyer chose to pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "storefront.payment_method", rename_all = "snake_case")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Card / UPI / netbanking through the Razorpay aggregator.
    Razorpay,
    /// USDT stablecoin transfer.
    CryptoUsdt,
}

impl PaymentMethod {
    /// Wire name (e.g. `CRYPTO_USDT`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Razorpay => "RAZORPAY",
            Self::CryptoUsdt => "CRYPTO_USDT",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RAZORPAY" | "razorpay" => Ok(Self::Razorpay),
            "CRYPTO_USDT" | "crypto_usdt" => Ok(Self::CryptoUsdt),
            _ => Err(format!("invalid payment method: {s}")),
        }
    }
}

/// Account role. Only the CLI can mint admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "storefront.user_role", rename_all = "snake_case")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("invalid role: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_reaches_both_terminals() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Completed));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Pending.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Completed));
        assert!(!PaymentStatus::Completed.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Completed.can_transition_to(PaymentStatus::Pending));
        assert!(PaymentStatus::Completed.can_transition_to(PaymentStatus::Completed));
    }

    #[test]
    fn test_payment_method_wire_names() {
        assert_eq!(
            serde_json::to_string(&PaymentMethod::CryptoUsdt).ok().as_deref(),
            Some("\"CRYPTO_USDT\"")
        );
        assert_eq!("RAZORPAY".parse::<PaymentMethod>(), Ok(PaymentMethod::Razorpay));
    }
}
