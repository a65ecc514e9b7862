//! Integration test harness for the WallCraft storefront.
//!
//! Every test builds a [`TestApp`]: the real services and router wired over
//! the in-memory store, a manual clock, a recording notifier and a Razorpay
//! gateway whose provider calls are stubbed but whose signature checks are
//! the production ones. No database or network is needed.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p wallcraft-integration-tests
//! ```

#![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::ConnectInfo;
use axum::http::{Request, Response, StatusCode, header};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use secrecy::SecretString;
use tower::ServiceExt;

use wallcraft_core::{CurrencyCode, OrderId, PaymentMethod, Price, ProductId, Role};
use wallcraft_storefront::app;
use wallcraft_storefront::config::{
    CryptoConfig, DownloadConfig, FileConfig, RazorpayConfig, StorefrontConfig,
};
use wallcraft_storefront::db::{CatalogStore, MemoryStore, Store};
use wallcraft_storefront::middleware::create_session_layer;
use wallcraft_storefront::models::{CurrentUser, NewProduct, Order, Product};
use wallcraft_storefront::services::clock::{Clock, ManualClock};
use wallcraft_storefront::services::notifications::{
    NotificationError, Notifier, OrderConfirmation,
};
use wallcraft_storefront::services::payments::{
    CallbackProof, ClientAction, CryptoGateway, GatewayEvent, PROVIDER_ORDER_KEY, PaymentError,
    PaymentGateway, PaymentGateways, ProviderHandle, RazorpayGateway,
};
use wallcraft_storefront::services::signing::sign_hex;
use wallcraft_storefront::state::AppState;

pub const BASE_URL: &str = "http://wallcraft.test";
pub const FILE_BASE_URL: &str = "https://files.wallcraft.test";
pub const KEY_SECRET: &str = "kT9#vQ2$mW7!pZ4&";
pub const WEBHOOK_SECRET: &str = "hX3@nB8*rL5^yC1%";
pub const PASSWORD: &str = "Wallpaper1";

/// Storefront configuration pointing at nothing real.
#[must_use]
pub fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        database_url: SecretString::from("postgres://unused"),
        host: [127, 0, 0, 1].into(),
        port: 0,
        base_url: BASE_URL.to_owned(),
        session_secret: SecretString::from("s".repeat(32)),
        razorpay: RazorpayConfig {
            key_id: "rzp_test_wallcraft".to_owned(),
            key_secret: SecretString::from(KEY_SECRET),
            webhook_secret: SecretString::from(WEBHOOK_SECRET),
            api_base: "http://127.0.0.1:9/v1".to_owned(),
            settlement_currency: CurrencyCode::USD,
            fx_rate: None,
            timeout: Duration::from_secs(1),
        },
        crypto: CryptoConfig {
            wallet_address: Some("TXwallcraftTestWallet".to_owned()),
            network: "TRC20".to_owned(),
        },
        downloads: DownloadConfig::default(),
        files: FileConfig {
            base_url: FILE_BASE_URL.to_owned(),
            signing_secret: SecretString::from("fL6!dG2#wQ9$"),
            url_ttl: chrono::Duration::hours(1),
        },
        email: None,
        sentry_dsn: None,
        sentry_environment: None,
        sentry_sample_rate: 0.0,
        sentry_traces_sample_rate: 0.0,
    }
}

// =============================================================================
// Collaborators
// =============================================================================

/// Razorpay with the order-creation call replaced.
///
/// Provider order ids are `order_test_{n}`. Callback and webhook
/// verification run through the real gateway.
pub struct StubRazorpay {
    inner: RazorpayGateway,
    opened: AtomicUsize,
    unreachable: AtomicBool,
}

impl StubRazorpay {
    #[must_use]
    pub fn new(config: RazorpayConfig) -> Self {
        Self {
            inner: RazorpayGateway::new(config).unwrap(),
            opened: AtomicUsize::new(0),
            unreachable: AtomicBool::new(false),
        }
    }

    /// Make subsequent order creation fail as if the provider were down.
    pub fn set_unreachable(&self, down: bool) {
        self.unreachable.store(down, Ordering::SeqCst);
    }

    #[must_use]
    pub fn orders_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for StubRazorpay {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Razorpay
    }

    async fn initiate(
        &self,
        order: &Order,
        _product: &Product,
        _user: &CurrentUser,
    ) -> Result<ProviderHandle, PaymentError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(PaymentError::Provider {
                status: 503,
                message: "service unavailable".to_owned(),
            });
        }

        let n = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let provider_order_id = format!("order_test_{n}");
        let amount = order.total.to_minor_units()?;
        Ok(ProviderHandle {
            provider_order_id: Some(provider_order_id.clone()),
            metadata: serde_json::json!({ PROVIDER_ORDER_KEY: provider_order_id }),
            client: ClientAction::Widget {
                provider_order_id,
                amount,
                currency: order.total.currency_code,
                public_key: "rzp_test_wallcraft".to_owned(),
            },
        })
    }

    fn verify_callback(&self, proof: &CallbackProof) -> Result<(), PaymentError> {
        self.inner.verify_callback(proof)
    }

    fn verify_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<GatewayEvent, PaymentError> {
        self.inner.verify_webhook(body, signature)
    }
}

/// Keeps every confirmation it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<OrderConfirmation>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    /// Make subsequent sends fail after recording the attempt.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    #[must_use]
    pub fn sent(&self) -> Vec<OrderConfirmation> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_order_confirmation(
        &self,
        confirmation: &OrderConfirmation,
    ) -> Result<(), NotificationError> {
        self.sent.lock().push(confirmation.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::InvalidAddress(
                confirmation.to.to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Test App
// =============================================================================

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub razorpay: Arc<StubRazorpay>,
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

impl TestApp {
    #[must_use]
    pub fn new() -> Self {
        let config = test_config();
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap(),
        ));
        let notifier = Arc::new(RecordingNotifier::default());
        let razorpay = Arc::new(StubRazorpay::new(config.razorpay.clone()));

        let gateway: Arc<dyn PaymentGateway> = razorpay.clone();
        let gateways = PaymentGateways::new()
            .with(gateway)
            .with(Arc::new(CryptoGateway::new(
                config.crypto.clone(),
                config.base_url.clone(),
            )));

        let shared_store: Arc<dyn Store> = store.clone();
        let shared_notifier: Arc<dyn Notifier> = notifier.clone();
        let state = AppState::new(
            config,
            shared_store,
            gateways,
            shared_notifier,
            clock.clone(),
        );

        Self {
            state,
            store,
            clock,
            notifier,
            razorpay,
        }
    }

    /// The full router with in-memory sessions and no burst limiter.
    #[must_use]
    pub fn router(&self) -> Router {
        let sessions = create_session_layer(
            tower_sessions::MemoryStore::default(),
            self.state.config(),
        );
        app(self.state.clone(), sessions, None)
    }

    /// Register an account and return its session identity.
    pub async fn user(&self, email: &str) -> CurrentUser {
        self.account(email, Role::User).await
    }

    pub async fn admin(&self, email: &str) -> CurrentUser {
        self.account(email, Role::Admin).await
    }

    async fn account(&self, email: &str, role: Role) -> CurrentUser {
        let user = self
            .state
            .auth()
            .create_account(email, PASSWORD, None, role)
            .await
            .unwrap();
        CurrentUser::from(&user)
    }

    /// An active wallpaper priced in USD.
    pub async fn wallpaper(&self, slug: &str, price: &str) -> Product {
        self.store
            .create_product(NewProduct {
                title: slug.replace('-', " "),
                slug: slug.to_owned(),
                description: None,
                price: Price::new(price.parse::<Decimal>().unwrap(), CurrencyCode::USD),
                category_id: None,
                file_ref: format!("wallpapers/{slug}/original.png"),
                preview_ref: format!("previews/{slug}.jpg"),
                thumbnail_ref: format!("thumbs/{slug}.jpg"),
                resolution: Some("3840x2160".to_owned()),
                is_active: true,
            })
            .await
            .unwrap()
    }

    /// Start a Razorpay checkout and return the order with its provider id.
    pub async fn razorpay_checkout(&self, user: &CurrentUser, product: &Product) -> (Order, String) {
        let session = self
            .state
            .checkout()
            .start(user, product.id, PaymentMethod::Razorpay)
            .await
            .unwrap();
        let ClientAction::Widget {
            provider_order_id, ..
        } = session.action
        else {
            panic!("razorpay checkout should open the widget");
        };
        let order = self.order(session.order_id).await;
        (order, provider_order_id)
    }

    /// Current time on the test clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn order(&self, id: OrderId) -> Order {
        self.state.ledger().get_order(id).await.unwrap().unwrap()
    }

    /// The product's purchase counter as stored.
    pub async fn product_downloads(&self, id: ProductId) -> i64 {
        self.store.get_product(id).await.unwrap().unwrap().downloads
    }
}

// =============================================================================
// Provider payloads
// =============================================================================

/// Callback proof signed the way the Razorpay widget signs it.
#[must_use]
pub fn signed_proof(provider_order_id: &str, provider_payment_id: &str) -> CallbackProof {
    CallbackProof {
        provider_order_id: provider_order_id.to_owned(),
        provider_payment_id: provider_payment_id.to_owned(),
        signature: sign_hex(
            KEY_SECRET.as_bytes(),
            format!("{provider_order_id}|{provider_payment_id}").as_bytes(),
        ),
    }
}

/// A Razorpay webhook body and its signature header value.
#[must_use]
pub fn webhook(
    event: &str,
    provider_payment_id: &str,
    provider_order_id: Option<&str>,
    local_order_id: Option<OrderId>,
) -> (Vec<u8>, String) {
    let notes = local_order_id.map_or_else(
        || serde_json::json!({}),
        |id| serde_json::json!({ "orderId": id.to_string() }),
    );
    let status = if event == "payment.failed" {
        "failed"
    } else {
        "captured"
    };
    let body = serde_json::json!({
        "entity": "event",
        "event": event,
        "payload": { "payment": { "entity": {
            "id": provider_payment_id,
            "order_id": provider_order_id,
            "status": status,
            "notes": notes,
        }}},
    })
    .to_string()
    .into_bytes();
    let signature = sign_hex(WEBHOOK_SECRET.as_bytes(), &body);
    (body, signature)
}

/// Sign arbitrary bytes with the webhook secret.
#[must_use]
pub fn signed_webhook_body(body: &[u8]) -> (Vec<u8>, String) {
    (body.to_vec(), sign_hex(WEBHOOK_SECRET.as_bytes(), body))
}

// =============================================================================
// HTTP helpers
// =============================================================================

/// JSON request, optionally carrying a session cookie.
#[must_use]
pub fn json_request(
    method: &str,
    uri: &str,
    body: &serde_json::Value,
    cookie: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Mark `request` as arriving on a direct connection from `peer`, as
/// `into_make_service_with_connect_info` does in the binary.
#[must_use]
pub fn from_peer(mut request: Request<Body>, peer: &str) -> Request<Body> {
    let addr: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

/// Send one request through the router.
pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

/// Status and decoded JSON body.
pub async fn json_response(response: Response<Body>) -> (StatusCode, serde_json::Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// The `name=value` pair of the session cookie set by `response`.
#[must_use]
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("wc_session="))
        .and_then(|v| v.split(';').next())
        .map(str::to_owned)
}

/// Log in over HTTP and return the session cookie.
pub async fn login(router: &Router, email: &str) -> String {
    let response = send(
        router,
        json_request(
            "POST",
            "/api/auth/login",
            &serde_json::json!({ "email": email, "password": PASSWORD }),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    session_cookie(&response).unwrap()
}
