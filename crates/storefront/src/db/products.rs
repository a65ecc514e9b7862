//! Catalog persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use wallcraft_core::{CategoryId, CurrencyCode, Price, ProductId};

use super::{CatalogStore, PgStore, RepositoryError, conflict_on_unique};
use crate::models::{Category, NewCategory, NewProduct, Product};

const PRODUCT_COLUMNS: &str = "id, title, slug, description, price, currency, category_id, \
     file_ref, preview_ref, thumbnail_ref, resolution, downloads, is_active, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct CategoryRow {
    id: CategoryId,
    name: String,
    slug: String,
    description: Option<String>,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            slug: row.slug,
            description: row.description,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: ProductId,
    title: String,
    slug: String,
    description: Option<String>,
    price: Decimal,
    currency: String,
    category_id: Option<CategoryId>,
    file_ref: String,
    preview_ref: String,
    thumbnail_ref: String,
    resolution: Option<String>,
    downloads: i64,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = RepositoryError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            title: row.title,
            slug: row.slug,
            description: row.description,
            price: Price::new(row.price, parse_currency(&row.currency)?),
            category_id: row.category_id,
            file_ref: row.file_ref,
            preview_ref: row.preview_ref,
            thumbnail_ref: row.thumbnail_ref,
            resolution: row.resolution,
            downloads: row.downloads,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Parse a stored currency code.
pub(super) fn parse_currency(raw: &str) -> Result<CurrencyCode, RepositoryError> {
    raw.parse()
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid currency in database: {e}")))
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn create_category(&self, category: NewCategory) -> Result<Category, RepositoryError> {
        let row: CategoryRow = sqlx::query_as(
            r"
            INSERT INTO storefront.categories (id, name, slug, description)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, slug, description
            ",
        )
        .bind(CategoryId::generate())
        .bind(&category.name)
        .bind(&category.slug)
        .bind(&category.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "category"))?;

        Ok(row.into())
    }

    async fn get_category_by_slug(&self, slug: &str) -> Result<Option<Category>, RepositoryError> {
        let row: Option<CategoryRow> = sqlx::query_as(
            "SELECT id, name, slug, description FROM storefront.categories WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Category::from))
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        let row: ProductRow = sqlx::query_as(&format!(
            r"
            INSERT INTO storefront.products
                (id, title, slug, description, price, currency, category_id,
                 file_ref, preview_ref, thumbnail_ref, resolution, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {PRODUCT_COLUMNS}
            "
        ))
        .bind(ProductId::generate())
        .bind(&product.title)
        .bind(&product.slug)
        .bind(&product.description)
        .bind(product.price.amount)
        .bind(product.price.currency_code.code())
        .bind(product.category_id)
        .bind(&product.file_ref)
        .bind(&product.preview_ref)
        .bind(&product.thumbnail_ref)
        .bind(&product.resolution)
        .bind(product.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "product slug"))?;

        row.try_into()
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row: Option<ProductRow> = sqlx::query_as(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM storefront.products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Product::try_from).transpose()
    }

    async fn get_product_by_slug(&self, slug: &str) -> Result<Option<Product>, RepositoryError> {
        let row: Option<ProductRow> = sqlx::query_as(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM storefront.products WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Product::try_from).transpose()
    }

    async fn count_products(&self, category: Option<CategoryId>) -> Result<i64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*)
            FROM storefront.products
            WHERE $1::uuid IS NULL OR category_id = $1
            ",
        )
        .bind(category)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
