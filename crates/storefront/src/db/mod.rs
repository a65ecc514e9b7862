//! Persistence for the storefront.
//!
//! # Database: `wallcraft`
//!
//! ## Tables (schema `storefront`)
//!
//! - `users` - Accounts and roles
//! - `categories`, `products` - Wallpaper catalog
//! - `orders`, `order_items` - Purchases and price snapshots
//! - `downloads` - Download grants, unique per `(order_id, product_id)`
//! - `tower_sessions.session` - Session storage
//!
//! # Stores
//!
//! Services talk to a [`Store`] trait object. [`PgStore`] is the production
//! implementation; [`MemoryStore`] keeps everything in process memory with
//! the same atomicity guarantees and backs the test suites.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p wallcraft-cli -- migrate
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use wallcraft_core::{CategoryId, Email, OrderId, ProductId, UserId};

use crate::models::{
    Category, Download, NewCategory, NewDownload, NewOrder, NewProduct, NewUser, Order, OrderItem,
    Product, Requester, User,
};

mod downloads;
pub mod memory;
mod orders;
mod products;
mod users;

pub use memory::MemoryStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., unique email).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Result of a conditional order status write.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// This call moved the order out of `Pending`. `issued` holds the grants
    /// that were newly inserted by this call.
    Applied { order: Order, issued: Vec<Download> },
    /// The order already had the requested status.
    Unchanged(Order),
    /// The order is in a different terminal status.
    Rejected(Order),
    NotFound,
}

/// Result of an atomic download redemption.
#[derive(Debug, Clone)]
pub enum RedeemOutcome {
    /// Count was incremented; `file_ref` is the product's private file.
    Redeemed { download: Download, file_ref: String },
    NotFound,
    Expired,
    LimitReached,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user. Returns `RepositoryError::Conflict` if the email exists.
    async fn create_user(&self, user: NewUser) -> Result<User, RepositoryError>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    /// Fetch a user together with their password hash.
    async fn get_user_credentials(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn create_category(&self, category: NewCategory) -> Result<Category, RepositoryError>;

    async fn get_category_by_slug(&self, slug: &str) -> Result<Option<Category>, RepositoryError>;

    async fn create_product(&self, product: NewProduct) -> Result<Product, RepositoryError>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    async fn get_product_by_slug(&self, slug: &str) -> Result<Option<Product>, RepositoryError>;

    /// Number of products in a category, for seeding summaries.
    async fn count_products(&self, category: Option<CategoryId>) -> Result<i64, RepositoryError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a pending order and its items in one transaction.
    ///
    /// Returns `RepositoryError::Conflict` if the order number is taken.
    async fn insert_order(
        &self,
        order: NewOrder,
        now: DateTime<Utc>,
    ) -> Result<(Order, Vec<OrderItem>), RepositoryError>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    async fn get_order_items(&self, id: OrderId) -> Result<Vec<OrderItem>, RepositoryError>;

    async fn find_order_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Whether `user` has a completed order containing `product`.
    async fn user_owns_product(
        &self,
        user: UserId,
        product: ProductId,
    ) -> Result<bool, RepositoryError>;

    /// Record the provider correlation id and method metadata on a pending
    /// order. Returns `false` if the order is missing or no longer pending.
    async fn set_payment_reference(
        &self,
        id: OrderId,
        payment_id: Option<&str>,
        metadata: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Atomically move a pending order to `Completed`, insert each grant not
    /// already present for its `(order, product)`, and bump the product
    /// download counter once per inserted grant. All or nothing.
    async fn complete_order(
        &self,
        id: OrderId,
        payment_id: Option<&str>,
        grants: &[NewDownload],
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RepositoryError>;

    /// Atomically move a pending order to `Failed`.
    async fn fail_order(
        &self,
        id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RepositoryError>;
}

#[async_trait]
pub trait DownloadStore: Send + Sync {
    /// Increment the grant's count if it exists, has not expired and has
    /// redemptions left; stamps requester metadata on success.
    async fn redeem_download(
        &self,
        token: &str,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, RepositoryError>;

    async fn get_download(&self, token: &str) -> Result<Option<Download>, RepositoryError>;

    async fn downloads_for_order(&self, id: OrderId) -> Result<Vec<Download>, RepositoryError>;
}

/// Everything the storefront persists.
#[async_trait]
pub trait Store: UserStore + CatalogStore + OrderStore + DownloadStore {
    /// Connectivity check used by the readiness endpoint.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// `PostgreSQL`-backed [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Map a unique-constraint violation to `RepositoryError::Conflict`.
fn conflict_on_unique(e: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(format!("{what} already exists"));
    }
    RepositoryError::Database(e)
}
