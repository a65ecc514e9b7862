//! Payment reconciliation.
//!
//! Confirmations reach the storefront over two unordered channels: the
//! browser callback after the provider widget closes, and the provider's
//! at-least-once webhook. Either may arrive first, both may be repeated,
//! and they may run concurrently. Every path funnels into [`finalize`], whose
//! only write is the ledger's compare-and-swap transition, so the order is
//! completed once and each item gets exactly one grant and one email.
//!
//! [`finalize`]: ReconciliationEngine::finalize

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use wallcraft_core::{OrderId, PaymentMethod, PaymentStatus};

use super::entitlements::{EntitlementService, RedeemError};
use super::notifications::{Notifier, OrderConfirmation};
use super::orders::{OrderError, OrderLedger, StatusChange, Transition};
use super::payments::{
    CallbackProof, GatewayEvent, PaymentError, PaymentGateways, PaymentRef,
    matches_provider_order,
};
use crate::db::{RepositoryError, Store};
use crate::models::{CurrentUser, Download, Order, OrderItem};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid payment signature")]
    InvalidSignature,

    #[error("order not found")]
    UnknownOrder,

    #[error("cannot move order from {from} to {to}")]
    IllegalTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    /// Resend requested for an order without grants.
    #[error("order is {0}, not completed")]
    NotCompleted(PaymentStatus),

    #[error(transparent)]
    Payment(PaymentError),

    #[error(transparent)]
    Order(OrderError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<OrderError> for ReconcileError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::UnknownOrder => Self::UnknownOrder,
            OrderError::IllegalTransition { from, to } => Self::IllegalTransition { from, to },
            OrderError::Repository(e) => Self::Repository(e),
            other => Self::Order(other),
        }
    }
}

impl From<PaymentError> for ReconcileError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::InvalidSignature => Self::InvalidSignature,
            other => Self::Payment(other),
        }
    }
}

impl From<RedeemError> for ReconcileError {
    fn from(e: RedeemError) -> Self {
        match e {
            RedeemError::Repository(e) => Self::Repository(e),
            // Grant listing never produces redemption outcomes.
            RedeemError::NotFound | RedeemError::Expired | RedeemError::LimitReached => {
                Self::UnknownOrder
            }
        }
    }
}

/// Result of a confirmation or admin override.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub order: Order,
    /// Whether this call changed the order's status.
    pub changed: bool,
    /// Grants created by this call.
    pub grants_issued: usize,
}

impl Settlement {
    const fn unchanged(order: Order) -> Self {
        Self {
            order,
            changed: false,
            grants_issued: 0,
        }
    }
}

/// What a verified webhook delivery led to. All variants are acknowledged.
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    Settled(Settlement),
    /// Event type this storefront does not act on.
    Ignored(String),
    /// No local order matches the event.
    UnknownOrder,
    /// The order is already in the opposite terminal status.
    Conflict(Order),
    /// Correctly signed, but the payload could not be decoded. Redelivery
    /// would carry the same bytes, so it is acknowledged and logged.
    Malformed(String),
}

pub struct ReconciliationEngine {
    store: Arc<dyn Store>,
    ledger: Arc<OrderLedger>,
    entitlements: Arc<EntitlementService>,
    gateways: PaymentGateways,
    notifier: Arc<dyn Notifier>,
}

impl ReconciliationEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<OrderLedger>,
        entitlements: Arc<EntitlementService>,
        gateways: PaymentGateways,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            ledger,
            entitlements,
            gateways,
            notifier,
        }
    }

    /// Handle the browser callback for `order_id`.
    ///
    /// The signature is checked before anything is read. Orders that do not
    /// exist or belong to someone else are reported as `UnknownOrder`; a
    /// signature for a different provider order is `InvalidSignature`.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::InvalidSignature`, `ReconcileError::UnknownOrder`
    /// or `ReconcileError::IllegalTransition` (order already failed).
    #[instrument(skip(self, user, proof), fields(user_id = %user.id))]
    pub async fn confirm_callback(
        &self,
        method: PaymentMethod,
        user: &CurrentUser,
        order_id: OrderId,
        proof: &CallbackProof,
    ) -> Result<Settlement, ReconcileError> {
        let gateway = self.gateways.get(method)?;
        if let Err(e) = gateway.verify_callback(proof) {
            warn!(error = %e, "Rejected payment callback");
            return Err(e.into());
        }

        let order = self
            .ledger
            .get_order(order_id)
            .await?
            .filter(|o| o.user_id == user.id && o.payment_method == method)
            .ok_or(ReconcileError::UnknownOrder)?;

        if !matches_provider_order(&order, &proof.provider_order_id) {
            warn!("Callback signature belongs to a different provider order");
            return Err(ReconcileError::InvalidSignature);
        }

        self.finalize(order, Some(proof.provider_payment_id.clone()))
            .await
    }

    /// Handle a raw webhook delivery.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::InvalidSignature` when the body is not signed
    /// by the provider; nothing is read or written in that case.
    #[instrument(skip(self, body, signature), fields(bytes = body.len()))]
    pub async fn handle_webhook(
        &self,
        method: PaymentMethod,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, ReconcileError> {
        let gateway = self.gateways.get(method)?;
        let event = match gateway.verify_webhook(body, signature) {
            Ok(event) => event,
            Err(PaymentError::MalformedPayload(reason)) => {
                warn!(%reason, "Signed webhook payload could not be decoded");
                return Ok(WebhookOutcome::Malformed(reason));
            }
            Err(e) => {
                warn!(error = %e, "Rejected webhook");
                return Err(e.into());
            }
        };

        match event {
            GatewayEvent::Ignored(name) => {
                debug!(event = %name, "Ignoring webhook event");
                Ok(WebhookOutcome::Ignored(name))
            }
            GatewayEvent::PaymentCaptured(payment) => {
                let Some(order) = self.resolve_order(&payment).await? else {
                    warn!(payment_id = %payment.provider_payment_id, "Captured payment has no local order");
                    return Ok(WebhookOutcome::UnknownOrder);
                };
                let id = order.id;
                match self
                    .finalize(order, Some(payment.provider_payment_id))
                    .await
                {
                    Ok(settlement) => Ok(WebhookOutcome::Settled(settlement)),
                    Err(ReconcileError::IllegalTransition { from, .. }) => {
                        warn!(status = %from, "Payment captured for an order that already failed; needs manual review");
                        self.conflict(id).await
                    }
                    Err(e) => Err(e),
                }
            }
            GatewayEvent::PaymentFailed(payment) => {
                let Some(order) = self.resolve_order(&payment).await? else {
                    debug!(payment_id = %payment.provider_payment_id, "Failed payment has no local order");
                    return Ok(WebhookOutcome::UnknownOrder);
                };
                let id = order.id;
                match self.ledger.transition_status(id, StatusChange::Fail).await {
                    Ok(Transition::Applied { order, .. }) => {
                        info!(order_number = %order.order_number, "Payment failed");
                        Ok(WebhookOutcome::Settled(Settlement {
                            order,
                            changed: true,
                            grants_issued: 0,
                        }))
                    }
                    Ok(Transition::Unchanged(order)) => {
                        debug!("Duplicate payment.failed delivery");
                        Ok(WebhookOutcome::Settled(Settlement::unchanged(order)))
                    }
                    Err(OrderError::IllegalTransition { .. }) => {
                        debug!("Failure event for a completed order; keeping it completed");
                        self.conflict(id).await
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// Complete `order` and issue its grants, or report that it already is.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::IllegalTransition` if the order failed.
    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    pub async fn finalize(
        &self,
        order: Order,
        payment_id: Option<String>,
    ) -> Result<Settlement, ReconcileError> {
        match order.payment_status {
            PaymentStatus::Completed => {
                debug!("Order already completed; duplicate confirmation");
                return Ok(Settlement::unchanged(order));
            }
            PaymentStatus::Failed => {
                return Err(ReconcileError::IllegalTransition {
                    from: PaymentStatus::Failed,
                    to: PaymentStatus::Completed,
                });
            }
            PaymentStatus::Pending => {}
        }

        let items = self.ledger.items(order.id).await?;
        let grants = self.entitlements.prepare_grants(&order, &items);

        match self
            .ledger
            .transition_status(order.id, StatusChange::Complete { payment_id, grants })
            .await?
        {
            Transition::Applied { order, issued } => {
                self.notify(&order, &items, &issued).await;
                Ok(Settlement {
                    grants_issued: issued.len(),
                    order,
                    changed: true,
                })
            }
            Transition::Unchanged(order) => {
                debug!("Lost completion race; another confirmation finalized the order");
                Ok(Settlement::unchanged(order))
            }
        }
    }

    /// Force an order's status from the back office.
    ///
    /// Completion runs the same finalization as a provider confirmation.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::UnknownOrder` or
    /// `ReconcileError::IllegalTransition`.
    #[instrument(skip(self), fields(admin_id = %admin.id))]
    pub async fn admin_override(
        &self,
        admin: &CurrentUser,
        order_id: OrderId,
        target: PaymentStatus,
    ) -> Result<Settlement, ReconcileError> {
        let order = self
            .ledger
            .get_order(order_id)
            .await?
            .ok_or(ReconcileError::UnknownOrder)?;

        let settlement = match target {
            PaymentStatus::Completed => self.finalize(order, None).await?,
            PaymentStatus::Failed => match self
                .ledger
                .transition_status(order_id, StatusChange::Fail)
                .await?
            {
                Transition::Applied { order, .. } => Settlement {
                    order,
                    changed: true,
                    grants_issued: 0,
                },
                Transition::Unchanged(order) => Settlement::unchanged(order),
            },
            PaymentStatus::Pending if order.payment_status == PaymentStatus::Pending => {
                Settlement::unchanged(order)
            }
            PaymentStatus::Pending => {
                return Err(ReconcileError::IllegalTransition {
                    from: order.payment_status,
                    to: target,
                });
            }
        };

        info!(
            order_number = %settlement.order.order_number,
            status = %settlement.order.payment_status,
            changed = settlement.changed,
            "Admin status override"
        );
        Ok(settlement)
    }

    /// Send the confirmation for every existing grant of a completed order
    /// again. Returns the number of notifications attempted.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::UnknownOrder` or `ReconcileError::NotCompleted`.
    #[instrument(skip(self))]
    pub async fn resend_confirmations(&self, order_id: OrderId) -> Result<usize, ReconcileError> {
        let order = self
            .ledger
            .get_order(order_id)
            .await?
            .ok_or(ReconcileError::UnknownOrder)?;
        if order.payment_status != PaymentStatus::Completed {
            return Err(ReconcileError::NotCompleted(order.payment_status));
        }

        let items = self.ledger.items(order_id).await?;
        let grants = self.entitlements.grants_for_order(order_id).await?;
        self.notify(&order, &items, &grants).await;
        Ok(grants.len())
    }

    /// Resolve the local order for a webhook event: notes first, then the
    /// provider order id, then the payment id recorded at completion.
    async fn resolve_order(&self, payment: &PaymentRef) -> Result<Option<Order>, ReconcileError> {
        if let Some(id) = payment.local_order_id
            && let Some(order) = self.ledger.get_order(id).await?
        {
            return Ok(Some(order));
        }
        if let Some(provider_order_id) = &payment.provider_order_id
            && let Some(order) = self.ledger.find_by_payment_id(provider_order_id).await?
        {
            return Ok(Some(order));
        }
        Ok(self
            .ledger
            .find_by_payment_id(&payment.provider_payment_id)
            .await?)
    }

    async fn conflict(&self, id: OrderId) -> Result<WebhookOutcome, ReconcileError> {
        let order = self.ledger.get_order(id).await?;
        Ok(order.map_or(WebhookOutcome::UnknownOrder, WebhookOutcome::Conflict))
    }

    /// Send one confirmation per grant. Failures are logged and dropped.
    async fn notify(&self, order: &Order, items: &[OrderItem], grants: &[Download]) {
        if grants.is_empty() {
            return;
        }

        let user = match self.store.get_user(order.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(user_id = %order.user_id, "Order owner missing; skipping confirmation");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Could not load order owner; skipping confirmation");
                return;
            }
        };

        for grant in grants {
            let title = match self.store.get_product(grant.product_id).await {
                Ok(Some(product)) => product.title,
                Ok(None) => "your wallpaper".to_owned(),
                Err(e) => {
                    warn!(error = %e, product_id = %grant.product_id, "Could not load product for confirmation");
                    continue;
                }
            };
            let price = items
                .iter()
                .find(|item| item.product_id == grant.product_id)
                .map_or(order.total, |item| item.price);

            let confirmation = OrderConfirmation {
                to: user.email.clone(),
                order_number: order.order_number.clone(),
                wallpaper_title: title,
                price,
                download_url: self.entitlements.download_url(&grant.token),
                expires_at: grant.expires_at,
            };
            if let Err(e) = self.notifier.send_order_confirmation(&confirmation).await {
                warn!(error = %e, order_number = %order.order_number, "Order confirmation not sent");
            }
        }
    }
}
