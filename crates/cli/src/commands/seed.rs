//! Seed the catalog with categories and wallpapers.
//!
//! Reads a YAML catalog (the bundled `seed/catalog.yaml` by default) and
//! inserts whatever is missing. Existing slugs are left untouched, so the
//! command can be run repeatedly.

use std::collections::HashMap;
use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use wallcraft_core::{CategoryId, CurrencyCode, Price};
use wallcraft_storefront::db::{CatalogStore, PgStore};
use wallcraft_storefront::models::{NewCategory, NewProduct};

use super::{CommandError, connect};

const BUNDLED_CATALOG: &str = include_str!("../../seed/catalog.yaml");

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    categories: Vec<CategorySeed>,
    #[serde(default)]
    wallpapers: Vec<WallpaperSeed>,
}

#[derive(Debug, Deserialize)]
struct CategorySeed {
    name: String,
    slug: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WallpaperSeed {
    title: String,
    slug: String,
    description: Option<String>,
    /// Category slug.
    category: Option<String>,
    price: Decimal,
    #[serde(default)]
    currency: CurrencyCode,
    file: String,
    preview: String,
    thumbnail: String,
    resolution: Option<String>,
    #[serde(default = "default_active")]
    active: bool,
}

const fn default_active() -> bool {
    true
}

fn parse_catalog(content: &str) -> Result<Catalog, CommandError> {
    Ok(serde_yaml::from_str(content)?)
}

/// Seed the catalog from `file`, or the bundled sample when `None`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, a wallpaper names
/// an unknown category, or a database operation fails.
pub async fn catalog(file: Option<&str>) -> Result<(), CommandError> {
    let catalog = match file {
        Some(path) => {
            info!(path, "Loading catalog from file");
            parse_catalog(&tokio::fs::read_to_string(Path::new(path)).await?)?
        }
        None => parse_catalog(BUNDLED_CATALOG)?,
    };
    info!(
        categories = catalog.categories.len(),
        wallpapers = catalog.wallpapers.len(),
        "Parsed catalog"
    );

    let store = PgStore::new(connect().await?);

    let mut category_ids: HashMap<String, CategoryId> = HashMap::new();
    let mut categories_created = 0;
    for seed in catalog.categories {
        let category = match store.get_category_by_slug(&seed.slug).await? {
            Some(existing) => existing,
            None => {
                categories_created += 1;
                store
                    .create_category(NewCategory {
                        name: seed.name,
                        slug: seed.slug,
                        description: seed.description,
                    })
                    .await?
            }
        };
        category_ids.insert(category.slug, category.id);
    }

    let mut created = 0;
    let mut skipped = 0;
    for seed in catalog.wallpapers {
        if store.get_product_by_slug(&seed.slug).await?.is_some() {
            skipped += 1;
            continue;
        }

        let category_id = match seed.category {
            Some(slug) => Some(*category_ids.get(&slug).ok_or_else(|| {
                CommandError::UnknownCategory {
                    slug: seed.slug.clone(),
                    category: slug.clone(),
                }
            })?),
            None => None,
        };

        store
            .create_product(NewProduct {
                title: seed.title,
                slug: seed.slug,
                description: seed.description,
                price: Price::new(seed.price, seed.currency),
                category_id,
                file_ref: seed.file,
                preview_ref: seed.preview,
                thumbnail_ref: seed.thumbnail,
                resolution: seed.resolution,
                is_active: seed.active,
            })
            .await?;
        created += 1;
    }

    let total = store.count_products(None).await?;
    info!("Seeding complete!");
    info!("  Categories created: {categories_created}");
    info!("  Wallpapers created: {created}");
    info!("  Wallpapers skipped (already exist): {skipped}");
    info!("  Wallpapers in catalog: {total}");

    Ok(())
}
