//! Payment gateway adapters.
//!
//! Each payment method is one [`PaymentGateway`] implementation selected by
//! the order's stored [`PaymentMethod`]:
//!
//! - [`RazorpayGateway`] - card/UPI aggregator, opened as a Razorpay order and
//!   completed in the browser widget
//! - [`CryptoGateway`] - USDT transfer confirmed out of band on a hosted page
//!
//! Gateways only build provider transactions and check authenticity. Order
//! state is owned by the ledger and reconciliation engine.

mod crypto;
mod razorpay;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use wallcraft_core::{CurrencyCode, OrderId, PaymentMethod, PriceError};

use crate::models::{CurrentUser, Order, Product};

pub use crypto::CryptoGateway;
pub use razorpay::{RAZORPAY_SIGNATURE_HEADER, RazorpayGateway};

/// Order metadata key holding the provider's order id.
///
/// Kept in metadata because `payment_id` is overwritten with the provider
/// payment id once the order completes.
pub const PROVIDER_ORDER_KEY: &str = "providerOrderId";

/// Errors raised by payment gateways.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The method has no gateway, or the gateway lacks configuration.
    #[error("payment method not configured: {0}")]
    NotConfigured(String),

    /// The provider rejected the request.
    #[error("provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    /// Transport failure or timeout talking to the provider.
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cannot price order: {0}")]
    Price(#[from] PriceError),

    /// Settlement currency differs from the order currency and no rate is set.
    #[error("no exchange rate configured from {from} to {to}")]
    MissingExchangeRate { from: CurrencyCode, to: CurrencyCode },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("malformed provider payload: {0}")]
    MalformedPayload(String),

    /// The gateway has no such confirmation channel.
    #[error("{0} does not support this confirmation channel")]
    Unsupported(PaymentMethod),
}

/// What the browser needs to continue checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientAction {
    /// Open the provider's checkout widget.
    #[serde(rename_all = "camelCase")]
    Widget {
        provider_order_id: String,
        /// Amount in the settlement currency's minor unit.
        amount: i64,
        currency: CurrencyCode,
        public_key: String,
    },
    /// Send the browser to a hosted payment page.
    #[serde(rename_all = "camelCase")]
    Redirect { redirect_url: String },
}

/// Result of opening a provider transaction.
#[derive(Debug, Clone)]
pub struct ProviderHandle {
    /// Provider correlation id to store on the order, if the provider has one.
    pub provider_order_id: Option<String>,
    /// Method-specific data merged into the order's metadata.
    pub metadata: serde_json::Value,
    pub client: ClientAction,
}

/// Proof returned by the browser after the provider widget succeeds.
#[derive(Debug, Clone)]
pub struct CallbackProof {
    pub provider_order_id: String,
    pub provider_payment_id: String,
    pub signature: String,
}

/// Whether `order` was opened at the provider as `provider_order_id`.
#[must_use]
pub fn matches_provider_order(order: &Order, provider_order_id: &str) -> bool {
    order.payment_id.as_deref() == Some(provider_order_id)
        || order
            .metadata
            .get(PROVIDER_ORDER_KEY)
            .and_then(serde_json::Value::as_str)
            == Some(provider_order_id)
}

/// Provider identifiers carried by a verified webhook event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRef {
    pub provider_order_id: Option<String>,
    pub provider_payment_id: String,
    /// Local order id echoed back from the notes attached at initiation.
    pub local_order_id: Option<OrderId>,
}

/// A verified webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    PaymentCaptured(PaymentRef),
    PaymentFailed(PaymentRef),
    /// A well-signed event this storefront does not act on.
    Ignored(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Open a provider transaction for a pending order.
    async fn initiate(
        &self,
        order: &Order,
        product: &Product,
        user: &CurrentUser,
    ) -> Result<ProviderHandle, PaymentError>;

    /// Check the signature on a browser callback.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::InvalidSignature` on mismatch.
    fn verify_callback(&self, proof: &CallbackProof) -> Result<(), PaymentError>;

    /// Check the signature on a raw webhook body and decode the event.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::InvalidSignature` on mismatch or missing header.
    fn verify_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<GatewayEvent, PaymentError>;
}

/// Gateways keyed by the method they serve.
#[derive(Clone, Default)]
pub struct PaymentGateways {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl PaymentGateways {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway, replacing any previous one for its method.
    #[must_use]
    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.method(), gateway);
        self
    }

    /// # Errors
    ///
    /// Returns `PaymentError::NotConfigured` if no gateway serves `method`.
    pub fn get(&self, method: PaymentMethod) -> Result<&Arc<dyn PaymentGateway>, PaymentError> {
        self.gateways
            .get(&method)
            .ok_or_else(|| PaymentError::NotConfigured(method.to_string()))
    }
}

impl std::fmt::Debug for PaymentGateways {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentGateways")
            .field("methods", &self.gateways.keys().collect::<Vec<_>>())
            .finish()
    }
}
