//! Database migration commands.
//!
//! Migrations live in `crates/storefront/migrations/` and are embedded at
//! compile time.

use tracing::info;

use super::{CommandError, connect};

/// Run storefront database migrations.
///
/// # Errors
///
/// Returns an error if the database URL is missing, the connection fails or
/// a migration fails.
pub async fn storefront() -> Result<(), CommandError> {
    let pool = connect().await?;

    info!("Running storefront migrations...");
    sqlx::migrate!("../storefront/migrations").run(&pool).await?;

    info!("Storefront migrations complete!");
    Ok(())
}
