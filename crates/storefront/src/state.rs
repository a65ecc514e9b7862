//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use crate::config::StorefrontConfig;
use crate::db::{PgStore, Store};
use crate::services::auth::AuthService;
use crate::services::checkout::CheckoutService;
use crate::services::clock::{Clock, SystemClock};
use crate::services::entitlements::EntitlementService;
use crate::services::files::FileStorage;
use crate::services::guard::{LoginLockout, MemoryGuard, RateLimiter};
use crate::services::notifications::{EmailNotifier, LogNotifier, NotificationError, Notifier};
use crate::services::orders::OrderLedger;
use crate::services::payments::{CryptoGateway, PaymentError, PaymentGateways, RazorpayGateway};
use crate::services::reconciliation::ReconciliationEngine;

/// Error building application state from configuration.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("payment gateway: {0}")]
    Payment(#[from] PaymentError),
    #[error("email transport: {0}")]
    Email(#[from] NotificationError),
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like the store, services and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    store: Arc<dyn Store>,
    guard: Arc<MemoryGuard>,
    ledger: Arc<OrderLedger>,
    entitlements: Arc<EntitlementService>,
    checkout: CheckoutService,
    reconciliation: ReconciliationEngine,
    auth: AuthService,
}

impl AppState {
    /// Build production state: Postgres store, configured gateways, and SMTP
    /// email when configured.
    ///
    /// # Errors
    ///
    /// Returns an error if a gateway or the SMTP transport cannot be built.
    pub fn from_config(config: StorefrontConfig, pool: PgPool) -> Result<Self, StateError> {
        let mut gateways =
            PaymentGateways::new().with(Arc::new(RazorpayGateway::new(config.razorpay.clone())?));
        if config.crypto.wallet_address.is_some() {
            gateways = gateways.with(Arc::new(CryptoGateway::new(
                config.crypto.clone(),
                config.base_url.clone(),
            )));
        } else {
            info!("CRYPTO_WALLET_ADDRESS not set; crypto checkout disabled");
        }

        let notifier: Arc<dyn Notifier> = match &config.email {
            Some(email) => Arc::new(EmailNotifier::new(email)?),
            None => {
                info!("SMTP_HOST not set; order confirmations will only be logged");
                Arc::new(LogNotifier)
            }
        };

        Ok(Self::new(
            config,
            Arc::new(PgStore::new(pool)),
            gateways,
            notifier,
            Arc::new(SystemClock),
        ))
    }

    /// Wire services over explicit collaborators.
    #[must_use]
    pub fn new(
        config: StorefrontConfig,
        store: Arc<dyn Store>,
        gateways: PaymentGateways,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let guard = Arc::new(MemoryGuard::new(Arc::clone(&clock)));
        let ledger = Arc::new(OrderLedger::new(Arc::clone(&store), Arc::clone(&clock)));
        let entitlements = Arc::new(EntitlementService::new(
            Arc::clone(&store),
            FileStorage::new(config.files.clone()),
            config.downloads,
            clock,
            config.base_url.clone(),
        ));
        let checkout = CheckoutService::new(Arc::clone(&ledger), gateways.clone());
        let reconciliation = ReconciliationEngine::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&entitlements),
            gateways,
            notifier,
        );
        let lockout: Arc<dyn LoginLockout> = guard.clone();
        let auth = AuthService::new(Arc::clone(&store), lockout);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                guard,
                ledger,
                entitlements,
                checkout,
                reconciliation,
                auth,
            }),
        }
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    /// Fixed-window limiter shared by all routes.
    #[must_use]
    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.inner.guard.as_ref()
    }

    #[must_use]
    pub fn ledger(&self) -> &OrderLedger {
        &self.inner.ledger
    }

    #[must_use]
    pub fn entitlements(&self) -> &EntitlementService {
        &self.inner.entitlements
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutService {
        &self.inner.checkout
    }

    #[must_use]
    pub fn reconciliation(&self) -> &ReconciliationEngine {
        &self.inner.reconciliation
    }

    #[must_use]
    pub fn auth(&self) -> &AuthService {
        &self.inner.auth
    }
}
