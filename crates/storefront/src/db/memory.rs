//! In-process [`Store`] implementation.
//!
//! All state sits behind one mutex, so every trait method is a single
//! critical section and gets the same atomicity the Postgres store gets from
//! conditional updates and transactions. The lock is never held across an
//! `.await`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use wallcraft_core::{
    CategoryId, DownloadId, Email, OrderId, OrderItemId, PaymentStatus, ProductId, UserId,
};

use super::{
    CatalogStore, DownloadStore, OrderStore, RedeemOutcome, RepositoryError, Store,
    TransitionOutcome, UserStore,
};
use crate::models::{
    Category, Download, NewCategory, NewDownload, NewOrder, NewProduct, NewUser, Order, OrderItem,
    Product, Requester, User,
};

#[derive(Default)]
struct State {
    users: HashMap<UserId, (User, String)>,
    categories: HashMap<CategoryId, Category>,
    products: HashMap<ProductId, Product>,
    orders: HashMap<OrderId, Order>,
    items: HashMap<OrderId, Vec<OrderItem>>,
    downloads: HashMap<String, Download>,
}

impl State {
    fn has_grant(&self, order: OrderId, product: ProductId) -> bool {
        self.downloads
            .values()
            .any(|d| d.order_id == order && d.product_id == product)
    }

    fn classify_miss(&self, id: OrderId, target: PaymentStatus) -> TransitionOutcome {
        match self.orders.get(&id) {
            None => TransitionOutcome::NotFound,
            Some(order) if order.payment_status == target => {
                TransitionOutcome::Unchanged(order.clone())
            }
            Some(order) => TransitionOutcome::Rejected(order.clone()),
        }
    }
}

/// Memory-backed store for tests and local demos.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a grant's expiry, e.g. to simulate the passage of time.
    pub fn set_download_expiry(&self, token: &str, expires_at: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        state
            .downloads
            .get_mut(token)
            .map(|d| d.expires_at = expires_at)
            .is_some()
    }

    /// Toggle a product's availability.
    pub fn set_product_active(&self, id: ProductId, active: bool) -> bool {
        let mut state = self.state.lock();
        state
            .products
            .get_mut(&id)
            .map(|p| p.is_active = active)
            .is_some()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User, RepositoryError> {
        let mut state = self.state.lock();
        if state.users.values().any(|(u, _)| u.email == user.email) {
            return Err(RepositoryError::Conflict("email already exists".to_owned()));
        }

        let now = Utc::now();
        let created = User {
            id: UserId::generate(),
            email: user.email,
            name: user.name,
            role: user.role,
            created_at: now,
            updated_at: now,
        };
        state
            .users
            .insert(created.id, (created.clone(), user.password_hash));
        Ok(created)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.state.lock().users.get(&id).map(|(u, _)| u.clone()))
    }

    async fn get_user_credentials(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .users
            .values()
            .find(|(u, _)| &u.email == email)
            .cloned())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn create_category(&self, category: NewCategory) -> Result<Category, RepositoryError> {
        let mut state = self.state.lock();
        if state
            .categories
            .values()
            .any(|c| c.slug == category.slug || c.name == category.name)
        {
            return Err(RepositoryError::Conflict("category already exists".to_owned()));
        }

        let created = Category {
            id: CategoryId::generate(),
            name: category.name,
            slug: category.slug,
            description: category.description,
        };
        state.categories.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_category_by_slug(&self, slug: &str) -> Result<Option<Category>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .categories
            .values()
            .find(|c| c.slug == slug)
            .cloned())
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        let mut state = self.state.lock();
        if state.products.values().any(|p| p.slug == product.slug) {
            return Err(RepositoryError::Conflict(
                "product slug already exists".to_owned(),
            ));
        }

        let now = Utc::now();
        let created = Product {
            id: ProductId::generate(),
            title: product.title,
            slug: product.slug,
            description: product.description,
            price: product.price,
            category_id: product.category_id,
            file_ref: product.file_ref,
            preview_ref: product.preview_ref,
            thumbnail_ref: product.thumbnail_ref,
            resolution: product.resolution,
            downloads: 0,
            is_active: product.is_active,
            created_at: now,
            updated_at: now,
        };
        state.products.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.state.lock().products.get(&id).cloned())
    }

    async fn get_product_by_slug(&self, slug: &str) -> Result<Option<Product>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .products
            .values()
            .find(|p| p.slug == slug)
            .cloned())
    }

    async fn count_products(&self, category: Option<CategoryId>) -> Result<i64, RepositoryError> {
        let state = self.state.lock();
        let count = state
            .products
            .values()
            .filter(|p| category.is_none() || p.category_id == category)
            .count();
        i64::try_from(count).map_err(|e| RepositoryError::DataCorruption(e.to_string()))
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(
        &self,
        order: NewOrder,
        now: DateTime<Utc>,
    ) -> Result<(Order, Vec<OrderItem>), RepositoryError> {
        let mut state = self.state.lock();
        if state
            .orders
            .values()
            .any(|o| o.order_number == order.order_number)
        {
            return Err(RepositoryError::Conflict(
                "order number already exists".to_owned(),
            ));
        }

        let created = Order {
            id: OrderId::generate(),
            order_number: order.order_number,
            user_id: order.user_id,
            total: order.total,
            payment_method: order.payment_method,
            payment_status: PaymentStatus::Pending,
            payment_id: None,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
            paid_at: None,
        };
        let items: Vec<OrderItem> = order
            .items
            .into_iter()
            .map(|item| OrderItem {
                id: OrderItemId::generate(),
                order_id: created.id,
                product_id: item.product_id,
                price: item.price,
            })
            .collect();

        state.orders.insert(created.id, created.clone());
        state.items.insert(created.id, items.clone());
        Ok((created, items))
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.state.lock().orders.get(&id).cloned())
    }

    async fn get_order_items(&self, id: OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .items
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_order_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .orders
            .values()
            .find(|o| o.payment_id.as_deref() == Some(payment_id))
            .cloned())
    }

    async fn user_owns_product(
        &self,
        user: UserId,
        product: ProductId,
    ) -> Result<bool, RepositoryError> {
        let state = self.state.lock();
        Ok(state.orders.values().any(|o| {
            o.user_id == user
                && o.payment_status == PaymentStatus::Completed
                && state
                    .items
                    .get(&o.id)
                    .is_some_and(|items| items.iter().any(|i| i.product_id == product))
        }))
    }

    async fn set_payment_reference(
        &self,
        id: OrderId,
        payment_id: Option<&str>,
        metadata: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock();
        let Some(order) = state
            .orders
            .get_mut(&id)
            .filter(|o| o.payment_status == PaymentStatus::Pending)
        else {
            return Ok(false);
        };

        if let Some(payment_id) = payment_id {
            order.payment_id = Some(payment_id.to_owned());
        }
        if let (Some(existing), Some(incoming)) = (order.metadata.as_object_mut(), metadata.as_object())
        {
            for (key, value) in incoming {
                existing.insert(key.clone(), value.clone());
            }
        }
        order.updated_at = now;
        Ok(true)
    }

    async fn complete_order(
        &self,
        id: OrderId,
        payment_id: Option<&str>,
        grants: &[NewDownload],
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut state = self.state.lock();

        let pending = state
            .orders
            .get(&id)
            .is_some_and(|o| o.payment_status == PaymentStatus::Pending);
        if !pending {
            return Ok(state.classify_miss(id, PaymentStatus::Completed));
        }

        let mut issued = Vec::with_capacity(grants.len());
        for grant in grants {
            if state.has_grant(grant.order_id, grant.product_id)
                || state.downloads.contains_key(&grant.token)
            {
                continue;
            }
            let download = Download {
                id: DownloadId::generate(),
                token: grant.token.clone(),
                user_id: grant.user_id,
                order_id: grant.order_id,
                product_id: grant.product_id,
                expires_at: grant.expires_at,
                max_downloads: grant.max_downloads,
                download_count: 0,
                last_download_at: None,
                ip_address: None,
                user_agent: None,
                created_at: now,
            };
            if let Some(product) = state.products.get_mut(&grant.product_id) {
                product.downloads += 1;
            }
            state.downloads.insert(download.token.clone(), download.clone());
            issued.push(download);
        }

        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        order.payment_status = PaymentStatus::Completed;
        if let Some(payment_id) = payment_id {
            order.payment_id = Some(payment_id.to_owned());
        }
        order.paid_at = Some(now);
        order.updated_at = now;

        Ok(TransitionOutcome::Applied {
            order: order.clone(),
            issued,
        })
    }

    async fn fail_order(
        &self,
        id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut state = self.state.lock();

        let pending = state
            .orders
            .get(&id)
            .is_some_and(|o| o.payment_status == PaymentStatus::Pending);
        if !pending {
            return Ok(state.classify_miss(id, PaymentStatus::Failed));
        }

        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        order.payment_status = PaymentStatus::Failed;
        order.updated_at = now;

        Ok(TransitionOutcome::Applied {
            order: order.clone(),
            issued: Vec::new(),
        })
    }
}

#[async_trait]
impl DownloadStore for MemoryStore {
    async fn redeem_download(
        &self,
        token: &str,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, RepositoryError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(download) = state.downloads.get_mut(token) else {
            return Ok(RedeemOutcome::NotFound);
        };
        if download.is_expired(now) {
            return Ok(RedeemOutcome::Expired);
        }
        if download.is_exhausted() {
            return Ok(RedeemOutcome::LimitReached);
        }

        // Resolve the file before spending a download on it.
        let file_ref = state
            .products
            .get(&download.product_id)
            .map(|p| p.file_ref.clone())
            .ok_or_else(|| {
                RepositoryError::DataCorruption(format!(
                    "download {} references a missing product",
                    download.id
                ))
            })?;

        download.download_count += 1;
        download.last_download_at = Some(now);
        download.ip_address.clone_from(&requester.ip_address);
        download.user_agent.clone_from(&requester.user_agent);
        let download = download.clone();

        Ok(RedeemOutcome::Redeemed { download, file_ref })
    }

    async fn get_download(&self, token: &str) -> Result<Option<Download>, RepositoryError> {
        Ok(self.state.lock().downloads.get(token).cloned())
    }

    async fn downloads_for_order(&self, id: OrderId) -> Result<Vec<Download>, RepositoryError> {
        let state = self.state.lock();
        let mut downloads: Vec<Download> = state
            .downloads
            .values()
            .filter(|d| d.order_id == id)
            .cloned()
            .collect();
        downloads.sort_by_key(|d| d.created_at);
        Ok(downloads)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn orphan_grant(now: DateTime<Utc>) -> Download {
        Download {
            id: DownloadId::generate(),
            token: "orphan-token".to_owned(),
            user_id: UserId::generate(),
            order_id: OrderId::generate(),
            product_id: ProductId::generate(),
            expires_at: now + chrono::Duration::hours(24),
            max_downloads: 5,
            download_count: 0,
            last_download_at: None,
            ip_address: None,
            user_agent: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_redeem_with_missing_product_spends_nothing() {
        let store = MemoryStore::new();
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        let grant = orphan_grant(now);
        store
            .state
            .lock()
            .downloads
            .insert(grant.token.clone(), grant.clone());

        let requester = Requester {
            ip_address: Some("203.0.113.7".to_owned()),
            user_agent: None,
        };
        let err = store
            .redeem_download(&grant.token, &requester, now)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::DataCorruption(_)));

        let stored = store.get_download(&grant.token).await.unwrap().unwrap();
        assert_eq!(stored.download_count, 0);
        assert!(stored.last_download_at.is_none());
        assert!(stored.ip_address.is_none());
    }
}
