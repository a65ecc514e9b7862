//! Checkout: create the pending order, then open the provider transaction.

use std::sync::Arc;

use thiserror::Error;
use tracing::{instrument, warn};

use wallcraft_core::{OrderId, OrderNumber, PaymentMethod, ProductId};

use super::orders::{OrderError, OrderLedger};
use super::payments::{ClientAction, PaymentError, PaymentGateways};
use crate::models::CurrentUser;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("payment method {0} is not available")]
    MethodUnavailable(PaymentMethod),

    /// The provider transaction could not be opened. The order stays
    /// pending and checkout can be retried.
    #[error("payment initiation failed: {source}")]
    PaymentInitiationFailed {
        order_id: OrderId,
        #[source]
        source: PaymentError,
    },
}

/// What the client needs to pay for a new order.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub action: ClientAction,
}

pub struct CheckoutService {
    ledger: Arc<OrderLedger>,
    gateways: PaymentGateways,
}

impl CheckoutService {
    #[must_use]
    pub const fn new(ledger: Arc<OrderLedger>, gateways: PaymentGateways) -> Self {
        Self { ledger, gateways }
    }

    /// Start paying for `product_id` with `method`.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::MethodUnavailable` for unregistered methods,
    /// `CheckoutError::Order` for ownership and availability failures, and
    /// `CheckoutError::PaymentInitiationFailed` when the gateway cannot open
    /// a transaction.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn start(
        &self,
        user: &CurrentUser,
        product_id: ProductId,
        method: PaymentMethod,
    ) -> Result<CheckoutSession, CheckoutError> {
        let gateway = self
            .gateways
            .get(method)
            .map_err(|_| CheckoutError::MethodUnavailable(method))?;

        let placed = self
            .ledger
            .create_order(user.id, product_id, method)
            .await?;
        let order_id = placed.order.id;

        let handle = gateway
            .initiate(&placed.order, &placed.product, user)
            .await
            .map_err(|source| {
                warn!(%order_id, error = %source, "Could not open provider transaction");
                CheckoutError::PaymentInitiationFailed { order_id, source }
            })?;

        self.ledger
            .attach_payment_reference(
                order_id,
                handle.provider_order_id.as_deref(),
                &handle.metadata,
            )
            .await?;

        Ok(CheckoutSession {
            order_id,
            order_number: placed.order.order_number,
            action: handle.client,
        })
    }
}
