//! `AppError`, the one error type route handlers return.
//!
//! 5xx errors are reported to Sentry before the response is written.
//! Responses are JSON bodies of the form `{"error": "..."}`. Payment callback
//! failures share one message so a caller cannot tell a bad signature from
//! an order that does not exist.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::models::CurrentUser;
use crate::services::auth::AuthError;
use crate::services::checkout::CheckoutError;
use crate::services::entitlements::RedeemError;
use crate::services::orders::OrderError;
use crate::services::payments::PaymentError;
use crate::services::reconciliation::ReconcileError;

const PAYMENT_VERIFICATION_FAILED: &str = "Payment verification failed";
const INTERNAL_ERROR: &str = "Internal server error";

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Authentication operation failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Download error: {0}")]
    Redeem(#[from] RedeemError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// User is authenticated but lacks the role.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Rate limited; retry after the given number of seconds.
    #[error("Rate limited")]
    RateLimited { retry_after_secs: i64 },

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Status code and client-safe message.
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Self::Database(_) | Self::Internal(_) => internal(),
            Self::Auth(err) => auth_status(err),
            Self::Order(err) => order_status(err),
            Self::Checkout(err) => match err {
                CheckoutError::Order(err) => order_status(err),
                CheckoutError::MethodUnavailable(method) => (
                    StatusCode::BAD_REQUEST,
                    format!("Payment method {method} is not available"),
                ),
                CheckoutError::PaymentInitiationFailed { .. } => (
                    StatusCode::BAD_GATEWAY,
                    "Could not start payment, please try again".to_owned(),
                ),
            },
            Self::Reconcile(err) => reconcile_status(err),
            Self::Redeem(err) => match err {
                RedeemError::NotFound => {
                    (StatusCode::NOT_FOUND, "Download link not found".to_owned())
                }
                RedeemError::Expired => (StatusCode::GONE, "Download link has expired".to_owned()),
                RedeemError::LimitReached => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "Download limit reached".to_owned(),
                ),
                RedeemError::Repository(_) => internal(),
            },
            Self::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("Too many requests, try again in {retry_after_secs} seconds"),
            ),
        }
    }
}

fn internal() -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR.to_owned())
}

fn auth_status(err: &AuthError) -> (StatusCode, String) {
    match err {
        AuthError::InvalidCredentials => {
            (StatusCode::UNAUTHORIZED, "Invalid credentials".to_owned())
        }
        AuthError::AccountLocked { minutes } => (
            StatusCode::LOCKED,
            format!("Too many failed attempts. Try again in {minutes} minutes"),
        ),
        AuthError::UserAlreadyExists => (
            StatusCode::CONFLICT,
            "An account with this email already exists".to_owned(),
        ),
        AuthError::WeakPassword(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        AuthError::InvalidEmail(_) => (StatusCode::BAD_REQUEST, "Invalid email address".to_owned()),
        AuthError::InvalidName => (StatusCode::BAD_REQUEST, err.to_string()),
        AuthError::Repository(_) | AuthError::PasswordHash => internal(),
    }
}

fn order_status(err: &OrderError) -> (StatusCode, String) {
    match err {
        OrderError::AlreadyOwned => (
            StatusCode::BAD_REQUEST,
            "You already own this wallpaper".to_owned(),
        ),
        OrderError::ProductUnavailable => (StatusCode::NOT_FOUND, "Product not found".to_owned()),
        OrderError::UnknownOrder => (StatusCode::NOT_FOUND, "Order not found".to_owned()),
        OrderError::IllegalTransition { from, to } => (
            StatusCode::CONFLICT,
            format!("Order is {from} and cannot become {to}"),
        ),
        OrderError::OrderNumberExhausted | OrderError::Repository(_) => internal(),
    }
}

fn reconcile_status(err: &ReconcileError) -> (StatusCode, String) {
    match err {
        ReconcileError::InvalidSignature | ReconcileError::UnknownOrder => (
            StatusCode::BAD_REQUEST,
            PAYMENT_VERIFICATION_FAILED.to_owned(),
        ),
        ReconcileError::IllegalTransition { from, to } => (
            StatusCode::CONFLICT,
            format!("Order is {from} and cannot become {to}"),
        ),
        ReconcileError::NotCompleted(status) => (
            StatusCode::BAD_REQUEST,
            format!("Order is {status}, not completed"),
        ),
        ReconcileError::Payment(
            PaymentError::MalformedPayload(_)
            | PaymentError::NotConfigured(_)
            | PaymentError::Unsupported(_),
        ) => (
            StatusCode::BAD_REQUEST,
            PAYMENT_VERIFICATION_FAILED.to_owned(),
        ),
        ReconcileError::Order(err) => order_status(err),
        ReconcileError::Payment(_) | ReconcileError::Repository(_) => internal(),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(error = %self, %event_id, "Request failed");
        }

        let body = Json(json!({ "error": message }));
        match self {
            Self::RateLimited { retry_after_secs } => (
                status,
                [(header::RETRY_AFTER, retry_after_secs.max(1).to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Attach (or with `None`, detach) the signed-in user on the Sentry scope.
pub fn tag_sentry_user(user: Option<&CurrentUser>) {
    let user = user.map(|u| sentry::User {
        id: Some(u.id.to_string()),
        email: Some(u.email.to_string()),
        ..Default::default()
    });
    sentry::configure_scope(|scope| scope.set_user(user));
}

/// Record a checkout or payment step as a Sentry breadcrumb.
pub fn payment_breadcrumb(message: &str, fields: &[(&str, String)]) {
    sentry::add_breadcrumb(sentry::Breadcrumb {
        category: Some("payment".to_owned()),
        message: Some(message.to_owned()),
        level: sentry::Level::Info,
        data: fields
            .iter()
            .map(|(key, value)| ((*key).to_owned(), serde_json::Value::from(value.as_str())))
            .collect(),
        ..Default::default()
    });
}
