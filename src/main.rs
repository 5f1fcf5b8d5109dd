//! boxoffice-gateway server entry point.
//!
//! Wires the ledger, hold store, payment gateway, and services from
//! configuration, starts the expiry sweeper, and serves the HTTP API.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use boxoffice_gateway::api;
use boxoffice_gateway::app_state::AppState;
use boxoffice_gateway::config::{GatewayConfig, HoldStoreKind, PaymentGatewayKind};
use boxoffice_gateway::hold_store::{HoldStore, InMemoryHoldStore, RedisHoldStore};
use boxoffice_gateway::notify::LogConfirmationSender;
use boxoffice_gateway::payment::{MockPaymentGateway, PaymentGateway, StripeGateway, WebhookVerifier};
use boxoffice_gateway::persistence::{Ledger, PostgresLedger};
use boxoffice_gateway::service::{
    AvailabilityService, CheckoutSettings, Compensator, FulfillmentReconciler,
    ReservationCoordinator, UuidCodeGenerator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = GatewayConfig::from_env()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(addr = %config.listen_addr, ?config, "starting boxoffice-gateway");

    // Build persistence layer
    let postgres = PostgresLedger::connect(&config)
        .await
        .context("connecting to PostgreSQL")?;
    postgres.migrate().await.context("running migrations")?;
    let ledger: Arc<dyn Ledger> = Arc::new(postgres);

    let hold_store: Arc<dyn HoldStore> = match config.hold_store {
        HoldStoreKind::Redis => Arc::new(
            RedisHoldStore::connect(&config.redis_url, config.hold_expiry_grace())
                .await
                .context("connecting to Redis")?,
        ),
        HoldStoreKind::Memory => {
            tracing::warn!("using in-memory hold store; holds are not shared between instances");
            Arc::new(InMemoryHoldStore::new())
        }
    };

    let payments: Arc<dyn PaymentGateway> = match config.payment_gateway {
        PaymentGatewayKind::Stripe => Arc::new(
            StripeGateway::new(
                config.payment_api_base.clone(),
                config.payment_secret_key.clone(),
                config.payment_request_timeout(),
            )
            .context("building payment client")?,
        ),
        PaymentGatewayKind::Mock => {
            tracing::warn!("using mock payment gateway");
            Arc::new(MockPaymentGateway::new())
        }
    };

    // Build service layer
    let compensator = Compensator::new(Arc::clone(&hold_store));
    let coordinator = ReservationCoordinator::new(
        Arc::clone(&ledger),
        Arc::clone(&hold_store),
        payments,
        compensator.clone(),
        CheckoutSettings {
            reservation_ttl: config.reservation_ttl(),
            max_tickets_per_line: config.max_tickets_per_line,
            currency: config.payment_currency.clone(),
            success_url: config.checkout_success_url.clone(),
            cancel_url: config.checkout_cancel_url.clone(),
        },
    );
    let reconciler = FulfillmentReconciler::new(
        Arc::clone(&ledger),
        compensator.clone(),
        WebhookVerifier::new(
            config.payment_webhook_secret.clone(),
            config.webhook_tolerance(),
        ),
        Arc::new(UuidCodeGenerator::new(config.ticket_code_prefix.clone())),
        Arc::new(LogConfirmationSender),
    );
    let availability =
        AvailabilityService::new(ledger, hold_store, compensator.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = compensator.spawn_expiry_sweeper(config.expiry_sweep_interval(), shutdown_rx);

    // Build application state
    let app_state = AppState {
        coordinator: Arc::new(coordinator),
        reconciler: Arc::new(reconciler),
        availability: Arc::new(availability),
    };

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .merge(swagger_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown requested");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "expiry sweeper ended abnormally");
    }
    Ok(())
}

#[cfg(feature = "swagger-ui")]
fn swagger_routes() -> Router<AppState> {
    use utoipa::OpenApi;
    use utoipa_swagger_ui::SwaggerUi;

    Router::new().merge(
        SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api::ApiDoc::openapi()),
    )
}

#[cfg(not(feature = "swagger-ui"))]
fn swagger_routes() -> Router<AppState> {
    Router::new()
}
