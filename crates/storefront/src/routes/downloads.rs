//! Download redemption.

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::instrument;

use crate::error::AppError;
use crate::middleware::ClientIp;
use crate::models::Requester;
use crate::state::AppState;

/// Longest user agent stored with a redemption.
const MAX_USER_AGENT_LEN: usize = 512;

/// Build the download router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/download/{token}", get(download))
}

/// Redeem a download token and redirect to the file.
///
/// The token is the credential; no session is required.
///
/// # Errors
///
/// Returns 404 for unknown tokens, 410 once expired and 429 when the
/// download limit is used up.
#[instrument(skip_all)]
pub async fn download(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> Result<Response, AppError> {
    let requester = Requester {
        ip_address: ip.map(|ip| ip.to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect()),
    };

    let file = state.entitlements().redeem(&token, &requester).await?;

    Ok((
        StatusCode::FOUND,
        [
            (header::LOCATION, file.location),
            (header::CACHE_CONTROL, "no-store".to_owned()),
        ],
    )
        .into_response())
}
