//! Authentication route handlers.
//!
//! JSON login, signup and logout over the session cookie.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::post,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_sessions::Session;
use tracing::{info, instrument};

use wallcraft_core::{Email, Role, UserId};

use crate::error::{AppError, tag_sentry_user};
use crate::middleware::{
    ClientIp, OptionalAuth, clear_current_user, enforce, ip_key, set_current_user,
};
use crate::models::{CurrentUser, User};
use crate::services::guard::RateLimit;
use crate::state::AppState;

/// Build the auth router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/logout", post(logout))
}

// =============================================================================
// Request / Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

/// Public view of an account.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: UserId,
    pub email: Email,
    pub name: Option<String>,
    pub role: Role,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
}

async fn start_session(session: &Session, user: &User) -> Result<(), AppError> {
    let current = CurrentUser::from(user);
    set_current_user(session, &current)
        .await
        .map_err(|e| AppError::Internal(format!("session write failed: {e}")))?;
    tag_sentry_user(Some(&current));
    Ok(())
}

// =============================================================================
// Handlers
// =============================================================================

/// Log in with email and password.
///
/// # Errors
///
/// Returns 401 for bad credentials, 423 while the account is locked and
/// 429 when the IP exceeds the login budget.
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    ClientIp(ip): ClientIp,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    enforce(state.rate_limiter(), &ip_key("login", ip), RateLimit::AUTH)?;

    let user = state
        .auth()
        .login_with_password(&body.email, &body.password)
        .await?;
    start_session(&session, &user).await?;

    info!(user_id = %user.id, "User logged in");
    Ok(Json(AuthResponse { user: user.into() }))
}

/// Create a customer account and log it in.
///
/// # Errors
///
/// Returns 400 for invalid input, 409 if the email is taken and 429 when
/// the IP exceeds the signup budget.
#[instrument(skip_all)]
pub async fn signup(
    State(state): State<AppState>,
    session: Session,
    ClientIp(ip): ClientIp,
    Json(body): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    enforce(
        state.rate_limiter(),
        &ip_key("signup", ip),
        RateLimit::SIGNUP,
    )?;

    let user = state
        .auth()
        .register_with_password(&body.email, &body.password, body.name.as_deref())
        .await?;
    start_session(&session, &user).await?;

    Ok((StatusCode::CREATED, Json(AuthResponse { user: user.into() })))
}

/// End the session.
///
/// # Errors
///
/// Returns 500 if the session store cannot be updated.
#[instrument(skip_all)]
pub async fn logout(
    OptionalAuth(user): OptionalAuth,
    session: Session,
) -> Result<Json<Value>, AppError> {
    clear_current_user(&session)
        .await
        .map_err(|e| AppError::Internal(format!("session flush failed: {e}")))?;
    tag_sentry_user(None);

    if let Some(user) = user {
        info!(user_id = %user.id, "User logged out");
    }
    Ok(Json(json!({ "success": true })))
}
