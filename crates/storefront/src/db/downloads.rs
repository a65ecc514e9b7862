//! Download grant persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

use wallcraft_core::{DownloadId, OrderId, ProductId, UserId};

use super::{DownloadStore, PgStore, RedeemOutcome, RepositoryError};
use crate::models::{Download, Requester};

pub(super) const DOWNLOAD_COLUMNS: &str = "id, token, user_id, order_id, product_id, expires_at, \
     max_downloads, download_count, last_download_at, ip_address, user_agent, created_at";

#[derive(sqlx::FromRow)]
pub(super) struct DownloadRow {
    id: DownloadId,
    token: String,
    user_id: UserId,
    order_id: OrderId,
    product_id: ProductId,
    expires_at: DateTime<Utc>,
    max_downloads: i32,
    download_count: i32,
    last_download_at: Option<DateTime<Utc>>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<DownloadRow> for Download {
    fn from(row: DownloadRow) -> Self {
        Self {
            id: row.id,
            token: row.token,
            user_id: row.user_id,
            order_id: row.order_id,
            product_id: row.product_id,
            expires_at: row.expires_at,
            max_downloads: row.max_downloads,
            download_count: row.download_count,
            last_download_at: row.last_download_at,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RedeemedRow {
    #[sqlx(flatten)]
    download: DownloadRow,
    file_ref: String,
}

#[async_trait]
impl DownloadStore for PgStore {
    #[instrument(skip(self, token, requester))]
    async fn redeem_download(
        &self,
        token: &str,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, RepositoryError> {
        // Check and increment in one statement so concurrent redemptions
        // can never push download_count past max_downloads.
        let row: Option<RedeemedRow> = sqlx::query_as(&format!(
            r"
            WITH redeemed AS (
                UPDATE storefront.downloads
                SET download_count = download_count + 1,
                    last_download_at = $2,
                    ip_address = $3,
                    user_agent = $4
                WHERE token = $1
                  AND expires_at >= $2
                  AND download_count < max_downloads
                RETURNING {DOWNLOAD_COLUMNS}
            )
            SELECT redeemed.*, p.file_ref
            FROM redeemed
            JOIN storefront.products p ON p.id = redeemed.product_id
            "
        ))
        .bind(token)
        .bind(now)
        .bind(&requester.ip_address)
        .bind(&requester.user_agent)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(RedeemOutcome::Redeemed {
                download: row.download.into(),
                file_ref: row.file_ref,
            });
        }

        // Nothing updated: report why, checking expiry before the limit.
        Ok(match self.get_download(token).await? {
            None => RedeemOutcome::NotFound,
            Some(download) if download.is_expired(now) => RedeemOutcome::Expired,
            Some(_) => RedeemOutcome::LimitReached,
        })
    }

    async fn get_download(&self, token: &str) -> Result<Option<Download>, RepositoryError> {
        let row: Option<DownloadRow> = sqlx::query_as(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM storefront.downloads WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Download::from))
    }

    async fn downloads_for_order(&self, id: OrderId) -> Result<Vec<Download>, RepositoryError> {
        let rows: Vec<DownloadRow> = sqlx::query_as(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM storefront.downloads WHERE order_id = $1 ORDER BY created_at"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Download::from).collect())
    }
}
