//! Download grants.
//!
//! Grants are prepared here, inserted by the ledger when an order completes,
//! and redeemed here. Redemption is the only path from a buyer to a private
//! file: the store checks expiry and remaining count and increments in one
//! atomic step, then the file ref is resolved into a signed URL.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, instrument};

use wallcraft_core::OrderId;

use super::clock::Clock;
use super::files::FileStorage;
use crate::config::DownloadConfig;
use crate::db::{RedeemOutcome, RepositoryError, Store};
use crate::models::{Download, NewDownload, Order, OrderItem, Requester};

/// Random bytes per download token.
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum RedeemError {
    #[error("download link not found")]
    NotFound,

    #[error("download link has expired")]
    Expired,

    #[error("download limit reached")]
    LimitReached,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A successful redemption.
#[derive(Debug, Clone)]
pub struct RedeemedFile {
    /// The grant after its count was incremented.
    pub download: Download,
    /// Where to send the client.
    pub location: String,
}

pub struct EntitlementService {
    store: Arc<dyn Store>,
    files: FileStorage,
    policy: DownloadConfig,
    clock: Arc<dyn Clock>,
    base_url: String,
}

impl EntitlementService {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        files: FileStorage,
        policy: DownloadConfig,
        clock: Arc<dyn Clock>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            files,
            policy,
            clock,
            base_url: base_url.into(),
        }
    }

    #[must_use]
    pub const fn policy(&self) -> DownloadConfig {
        self.policy
    }

    /// Build one grant per item. Expiry and count limits are fixed here.
    #[must_use]
    pub fn prepare_grants(&self, order: &Order, items: &[OrderItem]) -> Vec<NewDownload> {
        let expires_at = self.clock.now() + self.policy.expiry;
        items
            .iter()
            .map(|item| NewDownload {
                token: generate_token(),
                user_id: order.user_id,
                order_id: order.id,
                product_id: item.product_id,
                expires_at,
                max_downloads: self.policy.max_downloads,
            })
            .collect()
    }

    /// Consume one download from the grant behind `token`.
    ///
    /// # Errors
    ///
    /// Returns `RedeemError::NotFound`, `RedeemError::Expired` or
    /// `RedeemError::LimitReached` when the grant cannot be used.
    #[instrument(skip_all)]
    pub async fn redeem(
        &self,
        token: &str,
        requester: &Requester,
    ) -> Result<RedeemedFile, RedeemError> {
        let now = self.clock.now();
        match self.store.redeem_download(token, requester, now).await? {
            RedeemOutcome::Redeemed { download, file_ref } => {
                debug!(
                    download_id = %download.id,
                    count = download.download_count,
                    max = download.max_downloads,
                    "Download redeemed"
                );
                Ok(RedeemedFile {
                    location: self.files.signed_url(&file_ref, now),
                    download,
                })
            }
            RedeemOutcome::NotFound => Err(RedeemError::NotFound),
            RedeemOutcome::Expired => Err(RedeemError::Expired),
            RedeemOutcome::LimitReached => Err(RedeemError::LimitReached),
        }
    }

    /// # Errors
    ///
    /// Returns `RedeemError::Repository` on storage failure.
    pub async fn grants_for_order(&self, id: OrderId) -> Result<Vec<Download>, RedeemError> {
        Ok(self.store.downloads_for_order(id).await?)
    }

    /// Public URL that redeems `token`.
    #[must_use]
    pub fn download_url(&self, token: &str) -> String {
        format!("{}/api/download/{token}", self.base_url)
    }
}

/// A URL-safe token carrying 256 bits of randomness.
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_tokens_are_unique_and_url_safe() {
        let tokens: HashSet<String> = (0..100).map(|_| generate_token()).collect();
        assert_eq!(tokens.len(), 100);
        for token in &tokens {
            assert_eq!(token.len(), 43);
            assert!(
                token
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            );
        }
    }
}
