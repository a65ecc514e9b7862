//! Payment provider webhooks.
//!
//! The body is taken as raw bytes: the signature covers the exact payload,
//! so it must be checked before any JSON parsing.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use wallcraft_core::PaymentMethod;

use crate::error::AppError;
use crate::services::payments::RAZORPAY_SIGNATURE_HEADER;
use crate::services::reconciliation::WebhookOutcome;
use crate::state::AppState;

/// Build the webhook router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/webhooks/razorpay", post(razorpay_webhook))
}

/// Handle a Razorpay webhook delivery.
///
/// Every verified delivery is acknowledged, including duplicates and events
/// for orders this storefront does not know, so the provider stops retrying.
///
/// # Errors
///
/// Returns 400 if the signature is missing or wrong. A correctly signed
/// payload that cannot be decoded is still acknowledged.
#[instrument(skip(state, headers, body))]
pub async fn razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(RAZORPAY_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state
        .reconciliation()
        .handle_webhook(PaymentMethod::Razorpay, &body, signature)
        .await?;

    match outcome {
        WebhookOutcome::Settled(settlement) if settlement.changed => info!(
            order_number = %settlement.order.order_number,
            status = %settlement.order.payment_status,
            grants = settlement.grants_issued,
            "Webhook settled order"
        ),
        WebhookOutcome::Settled(settlement) => debug!(
            order_number = %settlement.order.order_number,
            "Duplicate webhook delivery"
        ),
        WebhookOutcome::Ignored(event) => debug!(%event, "Webhook event ignored"),
        WebhookOutcome::UnknownOrder => debug!("Webhook for unknown order acknowledged"),
        WebhookOutcome::Malformed(reason) => debug!(%reason, "Undecodable webhook acknowledged"),
        WebhookOutcome::Conflict(order) => debug!(
            order_number = %order.order_number,
            status = %order.payment_status,
            "Webhook conflicts with terminal order status"
        ),
    }

    Ok(Json(json!({ "received": true })))
}
