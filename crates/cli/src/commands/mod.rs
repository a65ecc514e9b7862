//! CLI subcommands.

pub mod migrate;
pub mod seed;
pub mod user;

use secrecy::SecretString;
use sqlx::PgPool;
use thiserror::Error;

use wallcraft_storefront::db::{self, RepositoryError};
use wallcraft_storefront::services::auth::AuthError;

/// Errors shared by the subcommands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("Could not read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog file: {0}")]
    Catalog(#[from] serde_yaml::Error),

    #[error("Unknown category '{category}' for wallpaper '{slug}'")]
    UnknownCategory { slug: String, category: String },
}

/// Connect to the storefront database.
async fn connect() -> Result<PgPool, CommandError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("STOREFRONT_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("STOREFRONT_DATABASE_URL"))?;

    tracing::info!("Connecting to storefront database...");
    Ok(db::create_pool(&database_url).await?)
}
