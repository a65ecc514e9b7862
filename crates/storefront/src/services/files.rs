//! Private wallpaper file locations.
//!
//! Product `file_ref`s are never shown to clients directly. After a grant is
//! redeemed the ref is turned into a short-lived signed URL on the file
//! origin:
//!
//! ```text
//! {FILE_BASE_URL}/{file_ref}?expires={unix_seconds}&sig={hex}
//! ```
//!
//! where `sig` is HMAC-SHA256 over `{file_ref}:{expires}`. Refs that are
//! already absolute `http(s)` URLs are returned unchanged.

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;

use super::signing::{sign_hex, verify_hex};
use crate::config::FileConfig;

#[derive(Debug, Clone)]
pub struct FileStorage {
    config: FileConfig,
}

impl FileStorage {
    #[must_use]
    pub const fn new(config: FileConfig) -> Self {
        Self { config }
    }

    /// Resolve a private file ref into a URL valid until `now + url_ttl`.
    #[must_use]
    pub fn signed_url(&self, file_ref: &str, now: DateTime<Utc>) -> String {
        if file_ref.starts_with("https://") || file_ref.starts_with("http://") {
            return file_ref.to_owned();
        }

        let path = file_ref.trim_start_matches('/');
        let expires = (now + self.config.url_ttl).timestamp();
        let sig = sign_hex(
            self.config.signing_secret.expose_secret().as_bytes(),
            Self::message(path, expires).as_bytes(),
        );
        format!(
            "{}/{path}?expires={expires}&sig={sig}",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Check a signed URL's parameters, as the file origin would.
    #[must_use]
    pub fn verify(&self, file_ref: &str, expires: i64, sig: &str, now: DateTime<Utc>) -> bool {
        if now.timestamp() > expires {
            return false;
        }
        verify_hex(
            self.config.signing_secret.expose_secret().as_bytes(),
            Self::message(file_ref.trim_start_matches('/'), expires).as_bytes(),
            sig,
        )
    }

    fn message(path: &str, expires: i64) -> String {
        format!("{path}:{expires}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, TimeZone};
    use secrecy::SecretString;

    use super::*;

    fn storage() -> FileStorage {
        FileStorage::new(FileConfig {
            base_url: "https://files.wallcraft.store/".to_owned(),
            signing_secret: SecretString::from("file-signing-secret"),
            url_ttl: Duration::hours(1),
        })
    }

    #[test]
    fn test_signed_url_shape_and_verification() {
        let storage = storage();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        let url = storage.signed_url("wallpapers/aurora-4k.jpg", now);
        let parsed = url::Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("files.wallcraft.store"));
        assert_eq!(parsed.path(), "/wallpapers/aurora-4k.jpg");

        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        let expires: i64 = params["expires"].parse().unwrap();
        assert_eq!(expires, (now + Duration::hours(1)).timestamp());
        assert!(storage.verify("wallpapers/aurora-4k.jpg", expires, &params["sig"], now));
        assert!(!storage.verify("wallpapers/other.jpg", expires, &params["sig"], now));
        assert!(!storage.verify(
            "wallpapers/aurora-4k.jpg",
            expires,
            &params["sig"],
            now + Duration::hours(2)
        ));
    }

    #[test]
    fn test_absolute_refs_pass_through() {
        let storage = storage();
        let cdn = "https://cdn.example.com/aurora.jpg";
        assert_eq!(storage.signed_url(cdn, Utc::now()), cdn);
    }
}
