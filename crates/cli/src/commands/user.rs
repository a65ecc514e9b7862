//! User management commands.
//!
//! The only way to create an admin: signup over HTTP always yields a
//! customer account.

use std::sync::Arc;

use wallcraft_core::Role;
use wallcraft_storefront::db::PgStore;
use wallcraft_storefront::services::auth::AuthService;
use wallcraft_storefront::services::guard::MemoryGuard;

use super::{CommandError, connect};

/// Create a user with the same validation and hashing as signup.
///
/// # Errors
///
/// Returns an error for invalid input, an existing email or database failure.
pub async fn create_user(
    email: &str,
    password: &str,
    name: Option<&str>,
    admin: bool,
) -> Result<(), CommandError> {
    let pool = connect().await?;
    let auth = AuthService::new(Arc::new(PgStore::new(pool)), Arc::new(MemoryGuard::default()));

    let role = if admin { Role::Admin } else { Role::User };
    let user = auth.create_account(email, password, name, role).await?;

    tracing::info!(
        "User created successfully! ID: {}, Email: {}, Role: {}",
        user.id,
        user.email,
        user.role
    );
    Ok(())
}
