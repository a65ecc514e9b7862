//! Back-office order handlers. Admin session required.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{patch, post},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use wallcraft_core::{OrderId, PaymentStatus};

use crate::error::AppError;
use crate::middleware::RequireAdmin;
use crate::models::Order;
use crate::services::reconciliation::ReconcileError;
use crate::state::AppState;

/// Build the admin router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/orders/{id}", patch(update_order_status))
        .route("/api/admin/orders/{id}/resend", post(resend_confirmation))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderStatusRequest {
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderStatusResponse {
    pub order: Order,
    pub changed: bool,
    pub grants_issued: usize,
}

#[derive(Debug, Serialize)]
pub struct ResendResponse {
    pub sent: usize,
}

/// Admin routes report missing orders plainly.
fn not_found(e: ReconcileError) -> AppError {
    match e {
        ReconcileError::UnknownOrder => AppError::NotFound("Order".to_owned()),
        other => other.into(),
    }
}

/// Force an order's payment status.
///
/// Completing runs the same grant issuance and confirmation as a verified
/// payment.
///
/// # Errors
///
/// Returns 401/403 for non-admins, 404 for unknown orders and 409 when the
/// order is already in the other terminal status.
#[instrument(skip(state, admin, body), fields(admin_id = %admin.id, target = %body.payment_status))]
pub async fn update_order_status(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<OrderId>,
    Json(body): Json<UpdateOrderStatusRequest>,
) -> Result<Json<UpdateOrderStatusResponse>, AppError> {
    let settlement = state
        .reconciliation()
        .admin_override(&admin, id, body.payment_status)
        .await
        .map_err(not_found)?;

    Ok(Json(UpdateOrderStatusResponse {
        order: settlement.order,
        changed: settlement.changed,
        grants_issued: settlement.grants_issued,
    }))
}

/// Send the order confirmation again for a completed order.
///
/// # Errors
///
/// Returns 401/403 for non-admins, 404 for unknown orders and 400 when the
/// order is not completed.
#[instrument(skip(state, admin), fields(admin_id = %admin.id))]
pub async fn resend_confirmation(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<OrderId>,
) -> Result<Json<ResendResponse>, AppError> {
    let sent = state
        .reconciliation()
        .resend_confirmations(id)
        .await
        .map_err(not_found)?;

    Ok(Json(ResendResponse { sent }))
}
