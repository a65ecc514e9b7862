//! Environment-driven configuration.
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `STOREFRONT_BASE_URL` - Public origin, used for redirects and download links
//! - `STOREFRONT_SESSION_SECRET` - At least 32 random characters
//! - `RAZORPAY_KEY_ID` - Razorpay public key id (sent to the checkout widget)
//! - `RAZORPAY_KEY_SECRET` - Razorpay API secret (also signs client callbacks)
//! - `RAZORPAY_WEBHOOK_SECRET` - Razorpay webhook signing secret
//! - `FILE_SIGNING_SECRET` - Secret used to sign private wallpaper file URLs
//!
//! ## Optional
//! - `STOREFRONT_HOST`, `STOREFRONT_PORT` - Listen address (default: 127.0.0.1:3000)
//! - `RAZORPAY_API_BASE` - API base URL (default: <https://api.razorpay.com/v1>)
//! - `RAZORPAY_SETTLEMENT_CURRENCY` - Currency Razorpay orders are created in (default: INR)
//! - `RAZORPAY_FX_RATE` - Settlement units per product-currency unit
//! - `PAYMENT_PROVIDER_TIMEOUT_SECS` - Outbound provider call timeout (default: 10)
//! - `CRYPTO_WALLET_ADDRESS` - USDT receiving address (crypto checkout disabled when unset)
//! - `CRYPTO_NETWORK` - USDT network label (default: TRC20)
//! - `DOWNLOAD_LINK_EXPIRY_HOURS` - Download grant lifetime (default: 24)
//! - `DOWNLOAD_MAX_COUNT` - Redemptions allowed per grant (default: 5)
//! - `FILE_BASE_URL` - Origin serving private files (default: `{base_url}/files`)
//! - `FILE_URL_TTL_SECS` - Lifetime of signed file URLs (default: 3600)
//! - `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`, `EMAIL_FROM` - Order
//!   confirmation email (disabled when `SMTP_HOST` is unset)
//! - `SENTRY_DSN`, `SENTRY_ENVIRONMENT` - Error tracking (off without a DSN)
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Trace sample rate (default: 0.1)
//! - `LOG_FORMAT` - `json` for structured log lines (read by the binary, not this module)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use wallcraft_core::CurrencyCode;

const MIN_SESSION_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Substrings that mark a secret as copied from a sample `.env`.
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-", "changeme", "replace", "placeholder", "example", "secret", "password", "xxx",
    "todo", "fixme", "insert", "enter-", "put-your", "add-your",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingEnvVar(String),
    #[error("{0} is invalid: {1}")]
    InvalidEnvVar(String, String),
    #[error("{0} is not a usable secret: {1}")]
    InsecureSecret(String, String),
}

/// Everything the storefront reads from its environment.
///
/// Secrets are `SecretString`, whose `Debug` output is redacted, so every
/// config struct can derive `Debug` safely.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    pub database_url: SecretString,
    pub host: IpAddr,
    pub port: u16,
    /// No trailing slash.
    pub base_url: String,
    pub session_secret: SecretString,
    pub razorpay: RazorpayConfig,
    pub crypto: CryptoConfig,
    pub downloads: DownloadConfig,
    pub files: FileConfig,
    /// `None` logs confirmations instead of mailing them.
    pub email: Option<EmailConfig>,
    pub sentry_dsn: Option<String>,
    pub sentry_environment: Option<String>,
    pub sentry_sample_rate: f32,
    pub sentry_traces_sample_rate: f32,
}

/// Razorpay card/UPI aggregator.
#[derive(Debug, Clone)]
pub struct RazorpayConfig {
    /// Public key id, safe to hand to the browser widget.
    pub key_id: String,
    /// Signs `order_id|payment_id` on client callbacks.
    pub key_secret: SecretString,
    /// Signs raw webhook bodies.
    pub webhook_secret: SecretString,
    pub api_base: String,
    /// Currency Razorpay orders are opened in.
    pub settlement_currency: CurrencyCode,
    /// Settlement units per product-currency unit, when they differ.
    pub fx_rate: Option<Decimal>,
    pub timeout: Duration,
}

/// USDT checkout; disabled without a wallet address.
#[derive(Debug, Clone)]
pub struct CryptoConfig {
    pub wallet_address: Option<String>,
    pub network: String,
}

/// Lifetime and redemption cap stamped onto each new download grant.
#[derive(Debug, Clone, Copy)]
pub struct DownloadConfig {
    pub expiry: chrono::Duration,
    pub max_downloads: i32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            expiry: chrono::Duration::hours(24),
            max_downloads: 5,
        }
    }
}

/// Where private wallpaper files live and how long signed links last.
#[derive(Debug, Clone)]
pub struct FileConfig {
    pub base_url: String,
    pub signing_secret: SecretString,
    pub url_ttl: chrono::Duration,
}

/// SMTP relay for order confirmations.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: SecretString,
    /// `From` header, e.g. `WallCraft <orders@wallcraft.store>`.
    pub from_address: String,
}

impl StorefrontConfig {
    /// Read the process environment, after merging a `.env` file if one exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for a missing or unparsable variable, or a
    /// secret that looks like a placeholder or has too little entropy.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env is normal outside development.
        let _ = dotenvy::dotenv();

        let database_url = database_url()?;
        let host: IpAddr = parsed("STOREFRONT_HOST", "127.0.0.1")?;
        let port: u16 = parsed("STOREFRONT_PORT", "3000")?;
        let base_url = required("STOREFRONT_BASE_URL")?
            .trim_end_matches('/')
            .to_owned();
        url::Url::parse(&base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("STOREFRONT_BASE_URL".to_owned(), e.to_string())
        })?;
        let session_secret = strong_secret("STOREFRONT_SESSION_SECRET")?;
        check_secret_length(&session_secret, "STOREFRONT_SESSION_SECRET")?;

        let razorpay = RazorpayConfig::from_env()?;
        let crypto = CryptoConfig::from_env();
        let downloads = DownloadConfig::from_env()?;
        let files = FileConfig::from_env(&base_url)?;
        let email = EmailConfig::from_env()?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            session_secret,
            razorpay,
            crypto,
            downloads,
            files,
            email,
            sentry_dsn: optional("SENTRY_DSN"),
            sentry_environment: optional("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: parsed("SENTRY_SAMPLE_RATE", "1.0")?,
            sentry_traces_sample_rate: parsed("SENTRY_TRACES_SAMPLE_RATE", "0.1")?,
        })
    }

    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl RazorpayConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let fx_rate = optional("RAZORPAY_FX_RATE")
            .map(|raw| {
                Decimal::from_str(&raw)
                    .ok()
                    .filter(|rate| rate.is_sign_positive() && !rate.is_zero())
                    .ok_or_else(|| {
                        ConfigError::InvalidEnvVar(
                            "RAZORPAY_FX_RATE".to_owned(),
                            format!("expected a positive decimal, got {raw}"),
                        )
                    })
            })
            .transpose()?;

        Ok(Self {
            key_id: required("RAZORPAY_KEY_ID")?,
            key_secret: strong_secret("RAZORPAY_KEY_SECRET")?,
            webhook_secret: strong_secret("RAZORPAY_WEBHOOK_SECRET")?,
            api_base: or_default("RAZORPAY_API_BASE", "https://api.razorpay.com/v1")
                .trim_end_matches('/')
                .to_owned(),
            settlement_currency: parsed("RAZORPAY_SETTLEMENT_CURRENCY", "INR")?,
            fx_rate,
            timeout: Duration::from_secs(parsed(
                "PAYMENT_PROVIDER_TIMEOUT_SECS",
                "10",
            )?),
        })
    }
}

impl CryptoConfig {
    fn from_env() -> Self {
        Self {
            wallet_address: optional("CRYPTO_WALLET_ADDRESS")
                .filter(|addr| !addr.trim().is_empty()),
            network: or_default("CRYPTO_NETWORK", "TRC20"),
        }
    }
}

impl DownloadConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let hours: i64 = parsed("DOWNLOAD_LINK_EXPIRY_HOURS", "24")?;
        let max_downloads: i32 = parsed("DOWNLOAD_MAX_COUNT", "5")?;

        if hours <= 0 {
            return Err(ConfigError::InvalidEnvVar(
                "DOWNLOAD_LINK_EXPIRY_HOURS".to_owned(),
                "must be positive".to_owned(),
            ));
        }
        if max_downloads <= 0 {
            return Err(ConfigError::InvalidEnvVar(
                "DOWNLOAD_MAX_COUNT".to_owned(),
                "must be positive".to_owned(),
            ));
        }

        Ok(Self {
            expiry: chrono::Duration::hours(hours),
            max_downloads,
        })
    }
}

impl FileConfig {
    fn from_env(base_url: &str) -> Result<Self, ConfigError> {
        let ttl_secs: i64 = parsed("FILE_URL_TTL_SECS", "3600")?;

        Ok(Self {
            base_url: optional("FILE_BASE_URL")
                .unwrap_or_else(|| format!("{base_url}/files"))
                .trim_end_matches('/')
                .to_owned(),
            signing_secret: strong_secret("FILE_SIGNING_SECRET")?,
            url_ttl: chrono::Duration::seconds(ttl_secs),
        })
    }
}

impl EmailConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(smtp_host) = optional("SMTP_HOST") else {
            return Ok(None);
        };

        Ok(Some(Self {
            smtp_host,
            smtp_port: parsed("SMTP_PORT", "587")?,
            smtp_username: required("SMTP_USERNAME")?,
            smtp_password: plain_secret("SMTP_PASSWORD")?,
            from_address: or_default("EMAIL_FROM", "WallCraft <orders@wallcraft.store>"),
        }))
    }
}

// Environment access

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn required(key: &str) -> Result<String, ConfigError> {
    optional(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_owned()))
}

fn or_default(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_owned())
}

/// Parse `key`, or `default` when it is unset.
fn parsed<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    or_default(key, default)
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_owned(), e.to_string()))
}

/// `STOREFRONT_DATABASE_URL`, or the platform-provided `DATABASE_URL`.
fn database_url() -> Result<SecretString, ConfigError> {
    optional("STOREFRONT_DATABASE_URL")
        .or_else(|| optional("DATABASE_URL"))
        .map(SecretString::from)
        .ok_or_else(|| ConfigError::MissingEnvVar("STOREFRONT_DATABASE_URL".to_owned()))
}

fn plain_secret(key: &str) -> Result<SecretString, ConfigError> {
    required(key).map(SecretString::from)
}

/// A required secret that passes [`check_secret_strength`].
fn strong_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = required(key)?;
    check_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

// Secret validation

fn check_secret_length(secret: &SecretString, key: &str) -> Result<(), ConfigError> {
    let len = secret.expose_secret().len();
    if len >= MIN_SESSION_SECRET_LENGTH {
        return Ok(());
    }
    Err(ConfigError::InsecureSecret(
        key.to_owned(),
        format!("needs at least {MIN_SESSION_SECRET_LENGTH} characters, got {len}"),
    ))
}

/// Shannon entropy of `s` in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    let mut counts: HashMap<char, u32> = HashMap::new();
    let mut total: u32 = 0;
    for c in s.chars() {
        *counts.entry(c).or_default() += 1;
        total = total.saturating_add(1);
    }
    if total == 0 {
        return 0.0;
    }

    let total = f64::from(total);
    counts
        .values()
        .map(|&n| {
            let p = f64::from(n) / total;
            -p * p.log2()
        })
        .sum()
}

/// Reject placeholder-looking or low-entropy secrets.
fn check_secret_strength(secret: &str, key: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();
    if let Some(pattern) = PLACEHOLDER_PATTERNS.iter().find(|p| lower.contains(**p)) {
        return Err(ConfigError::InsecureSecret(
            key.to_owned(),
            format!("looks like a placeholder (contains '{pattern}')"),
        ));
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            key.to_owned(),
            format!(
                "only {entropy:.2} bits/char of entropy, need {MIN_ENTROPY_BITS_PER_CHAR:.1}; generate it randomly"
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy_bounds() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("ab") - 1.0).abs() < 0.01);
        assert!(shannon_entropy("aB3$xY9!mK2@nL5#") > 3.3);
    }

    #[test]
    fn test_webhook_secret_placeholder_rejected() {
        let err = check_secret_strength("your-razorpay-webhook-key", "RAZORPAY_WEBHOOK_SECRET")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(ref var, _) if var == "RAZORPAY_WEBHOOK_SECRET"));
    }

    #[test]
    fn test_low_entropy_secret_rejected() {
        assert!(check_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR").is_err());
        assert!(check_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR").is_ok());
    }

    #[test]
    fn test_session_secret_length() {
        assert!(check_secret_length(&SecretString::from("short"), "S").is_err());
        assert!(check_secret_length(&SecretString::from("a".repeat(32)), "S").is_ok());
    }

    #[test]
    fn test_download_policy_default() {
        let policy = DownloadConfig::default();
        assert_eq!(policy.expiry, chrono::Duration::hours(24));
        assert_eq!(policy.max_downloads, 5);
    }

    #[test]
    fn test_secret_configs_redact_debug() {
        let razorpay = RazorpayConfig {
            key_id: "rzp_live_public".to_owned(),
            key_secret: SecretString::from("razorpay-api-hidden"),
            webhook_secret: SecretString::from("razorpay-hook-hidden"),
            api_base: "https://api.razorpay.com/v1".to_owned(),
            settlement_currency: CurrencyCode::INR,
            fx_rate: None,
            timeout: Duration::from_secs(10),
        };
        let files = FileConfig {
            base_url: "https://cdn.wallcraft.store".to_owned(),
            signing_secret: SecretString::from("file-signer-hidden"),
            url_ttl: chrono::Duration::hours(1),
        };

        let output = format!("{razorpay:?} {files:?}");
        assert!(output.contains("rzp_live_public"));
        assert!(output.contains("cdn.wallcraft.store"));
        assert!(!output.contains("hidden"));
    }
}
