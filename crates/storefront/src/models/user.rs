//! User domain types.

use chrono::{DateTime, Utc};

use wallcraft_core::{Email, Role, UserId};

/// A storefront account.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub email: Email,
    pub name: Option<String>,
    /// Authorization-critical; only ever set server-side.
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data required to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: Email,
    pub name: Option<String>,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub role: Role,
}
