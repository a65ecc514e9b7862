//! Download grant domain types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use wallcraft_core::{DownloadId, OrderId, ProductId, UserId};

/// An entitlement to download one purchased file a bounded number of times
/// before `expires_at`.
///
/// At most one grant exists per `(order_id, product_id)`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Download {
    pub id: DownloadId,
    /// Opaque lookup key; treat as a bearer credential.
    #[serde(skip_serializing)]
    pub token: String,
    pub user_id: UserId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub expires_at: DateTime<Utc>,
    pub max_downloads: i32,
    pub download_count: i32,
    pub last_download_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Download {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.download_count >= self.max_downloads
    }
}

/// A grant prepared before the order completes; inserted only if no grant
/// exists yet for the same order and product.
#[derive(Debug, Clone)]
pub struct NewDownload {
    pub token: String,
    pub user_id: UserId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub expires_at: DateTime<Utc>,
    pub max_downloads: i32,
}

/// Who redeemed a grant, recorded for abuse review.
#[derive(Debug, Clone, Default)]
pub struct Requester {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
