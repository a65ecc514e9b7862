//! WallCraft Storefront - wallpaper checkout and delivery API.
//!
//! # Architecture
//!
//! - Axum JSON API behind Postgres-backed sessions
//! - `PostgreSQL` for users, catalog, orders and download grants
//! - Razorpay (card/UPI) and USDT payment gateways
//! - SMTP order confirmations rendered with Askama
//!
//! Logs are human readable unless `LOG_FORMAT=json`. Verbosity follows
//! `RUST_LOG`.
//!
//! Migrations are NOT run on startup. Run them explicitly via:
//! `cargo run -p wallcraft-cli -- migrate`

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::process::ExitCode;

use sentry::integrations::tracing as sentry_tracing;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use wallcraft_storefront::config::{ConfigError, StorefrontConfig};
use wallcraft_storefront::db;
use wallcraft_storefront::middleware::{
    burst_rate_limiter, create_session_layer, postgres_session_store,
};
use wallcraft_storefront::state::{AppState, StateError};

const DEFAULT_LOG_FILTER: &str = "wallcraft_storefront=info,tower_http=debug";

#[derive(Debug, Error)]
enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("database unavailable: {0}")]
    Database(#[from] sqlx::Error),
    #[error("could not build services: {0}")]
    State(#[from] StateError),
    #[error("could not serve: {0}")]
    Io(#[from] std::io::Error),
}

/// Install the subscriber. WARN and ERROR become Sentry events, INFO and
/// DEBUG become breadcrumbs.
fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let (plain_layer, json_layer) = if json {
        (None, Some(fmt::layer().json().flatten_event(true)))
    } else {
        (Some(fmt::layer()), None)
    };

    let sentry_layer = sentry_tracing::layer().event_filter(|metadata: &tracing::Metadata<'_>| match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        tracing::Level::TRACE => sentry_tracing::EventFilter::Ignore,
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(plain_layer)
        .with(json_layer)
        .with(sentry_layer)
        .init();
}

/// Start Sentry when a DSN is configured. The guard flushes on drop.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_deref()?;
    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config.sentry_environment.clone().map(Into::into),
            sample_rate: config.sentry_sample_rate,
            traces_sample_rate: config.sentry_traces_sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    ));
    info!(
        environment = config.sentry_environment.as_deref().unwrap_or("default"),
        "Sentry initialized"
    );
    Some(guard)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match serve().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Storefront stopped");
            ExitCode::FAILURE
        }
    }
}

async fn serve() -> Result<(), StartupError> {
    let config = StorefrontConfig::from_env()?;
    let _sentry = init_sentry(&config);

    let pool = db::create_pool(&config.database_url).await?;
    info!("Database pool created");

    let sessions = create_session_layer(postgres_session_store(&pool), &config);
    let addr = config.socket_addr();
    let state = AppState::from_config(config, pool)?;

    // Sentry layers wrap everything so transactions cover the whole request.
    let app = wallcraft_storefront::app(state, sessions, Some(burst_rate_limiter()))
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Storefront listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Storefront shut down cleanly");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
