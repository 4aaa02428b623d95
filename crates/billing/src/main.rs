//! Gallery Billing - order lifecycle and payment API.
//!
//! This binary serves the billing API on port 3002.
//!
//! # Architecture
//!
//! - Axum JSON API for checkout, payment returns, webhooks and admin
//! - `PostgreSQL` order store (or an in-memory store for local work)
//! - Sandbox or hosted-gateway payment provider
//! - SMTP or log-only order notifications
//!
//! # Security
//!
//! Gateway credentials and the signing passphrase never leave this process.
//! Webhooks are only trusted after their signature checks out.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::error::Error;
use std::sync::Arc;

use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gallery_billing::config::{BillingConfig, ProviderKind, StoreBackend};
use gallery_billing::db::{self, MemoryOrderStore, OrderStore, PgOrderStore};
use gallery_billing::payment::{
    HostedGatewayConfig, HostedGatewayProvider, PaymentError, PaymentProvider, SandboxProvider,
};
use gallery_billing::routes;
use gallery_billing::services::{
    BillingService, CheckoutSettings, EmailNotifier, LogNotifier, OrderNotifier,
};
use gallery_billing::state::AppState;

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &BillingConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            traces_sample_rate: config.sentry_traces_sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

/// Open the configured order store.
async fn build_store(config: &BillingConfig) -> Result<Arc<dyn OrderStore>, Box<dyn Error>> {
    match config.store {
        StoreBackend::Postgres => {
            let url = config
                .database_url()
                .ok_or("BILLING_DATABASE_URL is required for the postgres store")?;
            let pool = db::create_pool(url).await?;
            tracing::info!("Database pool created");
            Ok(Arc::new(PgOrderStore::new(pool)))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory order store; orders are lost on restart");
            Ok(Arc::new(MemoryOrderStore::new()))
        }
    }
}

/// Build the configured payment provider.
fn build_provider(config: &BillingConfig) -> Result<Arc<dyn PaymentProvider>, PaymentError> {
    let payment = &config.payment;
    match payment.provider {
        ProviderKind::Sandbox => Ok(Arc::new(SandboxProvider::with_mode(
            payment.test_mode,
            payment.passphrase.clone(),
        ))),
        ProviderKind::Hosted => {
            let (Some(merchant_id), Some(merchant_key)) =
                (payment.merchant_id.clone(), payment.merchant_key.clone())
            else {
                return Err(PaymentError::Configuration(
                    "hosted gateway needs a merchant id and key".to_owned(),
                ));
            };
            Ok(Arc::new(HostedGatewayProvider::new(HostedGatewayConfig {
                merchant_id,
                merchant_key,
                passphrase: payment.passphrase.clone(),
                test_mode: payment.test_mode,
            })?))
        }
    }
}

/// Build the notifier: SMTP when configured, otherwise log only.
fn build_notifier(config: &BillingConfig) -> Result<Arc<dyn OrderNotifier>, Box<dyn Error>> {
    match &config.email {
        Some(email) => Ok(Arc::new(EmailNotifier::new(email, config.store_name.clone())?)),
        None => {
            tracing::info!("SMTP not configured, order notifications are logged only");
            Ok(Arc::new(LogNotifier))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Load configuration from environment (needed for Sentry init)
    let config = BillingConfig::from_env()?;

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gallery_billing=info,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    // NOTE: Migrations are NOT run automatically on startup.
    // Run them explicitly via: cargo run -p gallery-cli -- migrate

    let store = build_store(&config).await?;
    let provider = build_provider(&config)?;
    let notifier = build_notifier(&config)?;
    tracing::info!(
        provider = provider.name(),
        test_mode = provider.is_test_mode(),
        signed = config.has_passphrase(),
        "Payment provider ready"
    );

    let billing = BillingService::new(
        store,
        provider,
        notifier,
        CheckoutSettings {
            currency: config.payment.currency,
            store_name: config.store_name.clone(),
        },
    );
    let state = AppState::new(billing, config.base_url());

    let app = routes::app(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let addr = config.socket_addr();
    tracing::info!("billing listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
