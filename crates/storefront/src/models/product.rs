//! Catalog domain types.

use chrono::{DateTime, Utc};

use wallcraft_core::{CategoryId, Price, ProductId};

/// A purchasable wallpaper.
///
/// `file_ref` points at the full-resolution asset and must never reach an
/// unauthenticated client; only the download endpoint resolves it.
#[derive(Debug, Clone)]
pub struct Product {
    pub id: ProductId,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: Price,
    pub category_id: Option<CategoryId>,
    pub file_ref: String,
    pub preview_ref: String,
    pub thumbnail_ref: String,
    pub resolution: Option<String>,
    /// Number of grants ever issued, not redemptions.
    pub downloads: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data required to add a wallpaper to the catalog.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: Price,
    pub category_id: Option<CategoryId>,
    pub file_ref: String,
    pub preview_ref: String,
    pub thumbnail_ref: String,
    pub resolution: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
}
