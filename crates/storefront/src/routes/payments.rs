//! Checkout and client payment callback handlers.

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use wallcraft_core::{OrderId, OrderNumber, PaymentMethod, PaymentStatus, ProductId};

use crate::error::{AppError, payment_breadcrumb};
use crate::middleware::{ClientIp, RequireAuth, enforce, ip_key};
use crate::services::guard::RateLimit;
use crate::services::payments::{CallbackProof, ClientAction};
use crate::state::AppState;

/// Build the payments router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/payments/create", post(create_payment))
        .route("/api/payments/verify/razorpay", post(verify_razorpay))
}

/// Checkout request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub product_id: ProductId,
    pub payment_method: PaymentMethod,
}

/// Checkout response: the local order plus what the browser does next.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentResponse {
    pub local_order_id: OrderId,
    pub order_number: OrderNumber,
    #[serde(flatten)]
    pub action: ClientAction,
}

/// Start a purchase.
///
/// # Errors
///
/// Returns 401 without a session, 400 if the wallpaper is already owned or
/// the method is unavailable, 404 for unknown or inactive products, 429 when
/// rate limited and 502 when the provider cannot be reached.
#[instrument(skip(state, user, body), fields(user_id = %user.id))]
pub async fn create_payment(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    ClientIp(ip): ClientIp,
    Json(body): Json<CreatePaymentRequest>,
) -> Result<Json<CreatePaymentResponse>, AppError> {
    enforce(
        state.rate_limiter(),
        &ip_key("payments", ip),
        RateLimit::API,
    )?;

    payment_breadcrumb(
        "Checkout started",
        &[
            ("product_id", body.product_id.to_string()),
            ("payment_method", body.payment_method.as_str().to_owned()),
        ],
    );

    let session = state
        .checkout()
        .start(&user, body.product_id, body.payment_method)
        .await?;

    Ok(Json(CreatePaymentResponse {
        local_order_id: session.order_id,
        order_number: session.order_number,
        action: session.action,
    }))
}

/// Body posted by the browser after the Razorpay widget succeeds.
///
/// Accepts the widget's own `razorpay_*` field names as well.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRazorpayRequest {
    #[serde(alias = "razorpay_order_id")]
    pub provider_order_id: String,
    #[serde(alias = "razorpay_payment_id")]
    pub provider_payment_id: String,
    #[serde(alias = "razorpay_signature")]
    pub signature: String,
    #[serde(alias = "orderId")]
    pub local_order_id: OrderId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub payment_status: PaymentStatus,
}

/// Confirm a Razorpay payment from the browser.
///
/// Idempotent: repeating a valid callback returns the completed order.
///
/// # Errors
///
/// Returns 401 without a session. Bad signatures and orders the caller
/// cannot see both produce the same 400.
#[instrument(skip(state, user, body), fields(user_id = %user.id, order_id = %body.local_order_id))]
pub async fn verify_razorpay(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    ClientIp(ip): ClientIp,
    Json(body): Json<VerifyRazorpayRequest>,
) -> Result<Json<VerifyPaymentResponse>, AppError> {
    enforce(
        state.rate_limiter(),
        &ip_key("payments", ip),
        RateLimit::API,
    )?;

    let proof = CallbackProof {
        provider_order_id: body.provider_order_id,
        provider_payment_id: body.provider_payment_id,
        signature: body.signature,
    };
    let settlement = state
        .reconciliation()
        .confirm_callback(PaymentMethod::Razorpay, &user, body.local_order_id, &proof)
        .await?;

    Ok(Json(VerifyPaymentResponse {
        success: true,
        order_id: settlement.order.id,
        order_number: settlement.order.order_number,
        payment_status: settlement.order.payment_status,
    }))
}
