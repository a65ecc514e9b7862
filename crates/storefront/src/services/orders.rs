//! Order ledger: creation and status transitions.
//!
//! The ledger is the only writer of order status. Payment confirmations and
//! admin overrides both go through [`OrderLedger::transition_status`], which
//! enforces `Pending -> Completed | Failed` with both targets terminal.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use wallcraft_core::{OrderId, OrderNumber, PaymentMethod, PaymentStatus, ProductId, UserId};

use super::clock::Clock;
use crate::db::{RepositoryError, Store, TransitionOutcome};
use crate::models::{Download, NewDownload, NewOrder, NewOrderItem, Order, OrderItem, Product};

/// Attempts at drawing an unused order number before giving up.
const ORDER_NUMBER_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("you already own this wallpaper")]
    AlreadyOwned,

    #[error("wallpaper not found or unavailable")]
    ProductUnavailable,

    #[error("order not found")]
    UnknownOrder,

    #[error("cannot move order from {from} to {to}")]
    IllegalTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("could not allocate a unique order number")]
    OrderNumberExhausted,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A freshly created pending order.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub product: Product,
}

/// Requested status change.
#[derive(Debug, Clone)]
pub enum StatusChange {
    /// Complete the order, recording the provider payment id if known and
    /// inserting the prepared grants.
    Complete {
        payment_id: Option<String>,
        grants: Vec<NewDownload>,
    },
    Fail,
}

impl StatusChange {
    #[must_use]
    pub const fn target(&self) -> PaymentStatus {
        match self {
            Self::Complete { .. } => PaymentStatus::Completed,
            Self::Fail => PaymentStatus::Failed,
        }
    }
}

/// Result of a legal transition request.
#[derive(Debug, Clone)]
pub enum Transition {
    /// This call changed the status. `issued` holds grants created by it.
    Applied { order: Order, issued: Vec<Download> },
    /// The order already had the target status; nothing was written.
    Unchanged(Order),
}

impl Transition {
    #[must_use]
    pub const fn order(&self) -> &Order {
        match self {
            Self::Applied { order, .. } | Self::Unchanged(order) => order,
        }
    }
}

pub struct OrderLedger {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl OrderLedger {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create a pending order for one product, snapshotting its price.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::ProductUnavailable` if the product is missing or
    /// inactive, and `OrderError::AlreadyOwned` if the user already has a
    /// completed order for it.
    #[instrument(skip(self), fields(order_id))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        product_id: ProductId,
        method: PaymentMethod,
    ) -> Result<PlacedOrder, OrderError> {
        let product = self
            .store
            .get_product(product_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or(OrderError::ProductUnavailable)?;

        if self.store.user_owns_product(user_id, product_id).await? {
            return Err(OrderError::AlreadyOwned);
        }

        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let now = self.clock.now();
            let new_order = NewOrder {
                order_number: OrderNumber::generate(now),
                user_id,
                total: product.price,
                payment_method: method,
                items: vec![NewOrderItem {
                    product_id,
                    price: product.price,
                }],
            };

            match self.store.insert_order(new_order, now).await {
                Ok((order, items)) => {
                    tracing::Span::current().record("order_id", tracing::field::display(order.id));
                    info!(order_number = %order.order_number, total = %order.total, "Order created");
                    return Ok(PlacedOrder {
                        order,
                        items,
                        product,
                    });
                }
                Err(RepositoryError::Conflict(_)) => {
                    warn!("Order number collision, drawing another");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(OrderError::OrderNumberExhausted)
    }

    /// Record the provider correlation id and method metadata.
    ///
    /// A no-op when the order is no longer pending: a fast webhook may have
    /// finalized it already.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Repository` on storage failure.
    pub async fn attach_payment_reference(
        &self,
        id: OrderId,
        payment_id: Option<&str>,
        metadata: &serde_json::Value,
    ) -> Result<(), OrderError> {
        let updated = self
            .store
            .set_payment_reference(id, payment_id, metadata, self.clock.now())
            .await?;
        if !updated {
            warn!(order_id = %id, "Order left pending before its payment reference was stored");
        }
        Ok(())
    }

    /// Apply a status change through the compare-and-swap store write.
    ///
    /// Repeating a change that already happened is reported as
    /// [`Transition::Unchanged`].
    ///
    /// # Errors
    ///
    /// Returns `OrderError::UnknownOrder` if the order does not exist and
    /// `OrderError::IllegalTransition` if it is in the other terminal state.
    #[instrument(skip(self, change), fields(target = %change.target()))]
    pub async fn transition_status(
        &self,
        id: OrderId,
        change: StatusChange,
    ) -> Result<Transition, OrderError> {
        let now = self.clock.now();
        let target = change.target();
        let outcome = match change {
            StatusChange::Complete { payment_id, grants } => {
                self.store
                    .complete_order(id, payment_id.as_deref(), &grants, now)
                    .await?
            }
            StatusChange::Fail => self.store.fail_order(id, now).await?,
        };

        match outcome {
            TransitionOutcome::Applied { order, issued } => {
                info!(
                    order_number = %order.order_number,
                    status = %order.payment_status,
                    grants = issued.len(),
                    "Order status changed"
                );
                Ok(Transition::Applied { order, issued })
            }
            TransitionOutcome::Unchanged(order) => Ok(Transition::Unchanged(order)),
            TransitionOutcome::Rejected(order) => Err(OrderError::IllegalTransition {
                from: order.payment_status,
                to: target,
            }),
            TransitionOutcome::NotFound => Err(OrderError::UnknownOrder),
        }
    }

    /// # Errors
    ///
    /// Returns `OrderError::Repository` on storage failure.
    pub async fn get_order(&self, id: OrderId) -> Result<Option<Order>, OrderError> {
        Ok(self.store.get_order(id).await?)
    }

    /// # Errors
    ///
    /// Returns `OrderError::Repository` on storage failure.
    pub async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Order>, OrderError> {
        Ok(self.store.find_order_by_payment_id(payment_id).await?)
    }

    /// # Errors
    ///
    /// Returns `OrderError::Repository` on storage failure.
    pub async fn items(&self, id: OrderId) -> Result<Vec<OrderItem>, OrderError> {
        Ok(self.store.get_order_items(id).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;
    use wallcraft_core::{CurrencyCode, Email, Price, Role};

    use super::*;
    use crate::db::{CatalogStore, MemoryStore, UserStore};
    use crate::models::{NewProduct, NewUser};
    use crate::services::clock::ManualClock;

    async fn fixture() -> (OrderLedger, Arc<MemoryStore>, UserId, Product) {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user(NewUser {
                email: Email::parse("buyer@example.com").unwrap(),
                name: None,
                password_hash: "hash".to_owned(),
                role: Role::User,
            })
            .await
            .unwrap();
        let product = store
            .create_product(NewProduct {
                title: "Aurora Borealis".to_owned(),
                slug: "aurora-borealis".to_owned(),
                description: None,
                price: Price::new(Decimal::from_str("2.99").unwrap(), CurrencyCode::USD),
                category_id: None,
                file_ref: "wallpapers/aurora-4k.jpg".to_owned(),
                preview_ref: "previews/aurora.jpg".to_owned(),
                thumbnail_ref: "thumbs/aurora.jpg".to_owned(),
                resolution: Some("3840x2160".to_owned()),
                is_active: true,
            })
            .await
            .unwrap();
        let ledger = OrderLedger::new(store.clone(), Arc::new(ManualClock::default()));
        (ledger, store, user.id, product)
    }

    #[tokio::test]
    async fn test_create_order_snapshots_price() {
        let (ledger, _store, user, product) = fixture().await;

        let placed = ledger
            .create_order(user, product.id, PaymentMethod::Razorpay)
            .await
            .unwrap();

        assert_eq!(placed.order.payment_status, PaymentStatus::Pending);
        assert_eq!(placed.order.total, product.price);
        assert!(placed.order.paid_at.is_none());
        assert_eq!(placed.items.len(), 1);
        assert_eq!(placed.items[0].price, product.price);
    }

    #[tokio::test]
    async fn test_inactive_product_is_unavailable() {
        let (ledger, store, user, product) = fixture().await;
        store.set_product_active(product.id, false);

        let err = ledger
            .create_order(user, product.id, PaymentMethod::Razorpay)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::ProductUnavailable));

        let err = ledger
            .create_order(user, ProductId::generate(), PaymentMethod::Razorpay)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::ProductUnavailable));
    }

    #[tokio::test]
    async fn test_completed_purchase_blocks_second_order() {
        let (ledger, _store, user, product) = fixture().await;
        let placed = ledger
            .create_order(user, product.id, PaymentMethod::Razorpay)
            .await
            .unwrap();

        // A pending order does not count as ownership.
        ledger
            .create_order(user, product.id, PaymentMethod::CryptoUsdt)
            .await
            .unwrap();

        ledger
            .transition_status(
                placed.order.id,
                StatusChange::Complete {
                    payment_id: Some("pay_1".to_owned()),
                    grants: Vec::new(),
                },
            )
            .await
            .unwrap();

        let err = ledger
            .create_order(user, product.id, PaymentMethod::Razorpay)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::AlreadyOwned));
    }

    #[tokio::test]
    async fn test_transitions_are_idempotent_and_terminal() {
        let (ledger, _store, user, product) = fixture().await;
        let placed = ledger
            .create_order(user, product.id, PaymentMethod::Razorpay)
            .await
            .unwrap();
        let id = placed.order.id;

        let first = ledger.transition_status(id, StatusChange::Fail).await.unwrap();
        assert!(matches!(first, Transition::Applied { .. }));
        assert!(first.order().paid_at.is_none());

        let again = ledger.transition_status(id, StatusChange::Fail).await.unwrap();
        assert!(matches!(again, Transition::Unchanged(_)));

        let err = ledger
            .transition_status(
                id,
                StatusChange::Complete {
                    payment_id: None,
                    grants: Vec::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::IllegalTransition {
                from: PaymentStatus::Failed,
                to: PaymentStatus::Completed
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let (ledger, _store, _user, _product) = fixture().await;
        let err = ledger
            .transition_status(OrderId::generate(), StatusChange::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::UnknownOrder));
    }
}
