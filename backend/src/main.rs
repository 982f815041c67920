//! Rank Store Backend
//!
//! Order-and-payment service for a storefront selling time-limited game
//! server ranks. Runs two concurrent subsystems:
//!
//! - **HTTP server** — the order, checkout, role, profile, and configuration
//!   API plus liveness (`/health`) and readiness (`/status`) probes.
//! - **Reconciler** — periodically checks pending orders' checkout sessions
//!   with the payment processor and marks confirmed ones `paid`.

use actix_web::{App, HttpServer, web};
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod api;
mod catalog;
mod config;
mod error;
#[cfg(test)]
mod fake_processor;
mod gateway;
mod idempotency;
mod identity;
mod metrics;
mod orders;
mod payment_config;
mod persistence;
mod reconciler;
mod service;
mod transform;

use catalog::Catalog;
use config::AppConfig;
use gateway::StripeGateway;
use identity::IdentityHeader;
use metrics::Metrics;
use persistence::{Snapshot, SnapshotFile};
use service::Backend;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn,actix_server=warn")),
        )
        .with_target(true)
        .with_ansi(true)
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    let catalog = match &config.catalog_path {
        Some(path) => Catalog::from_file(path)?,
        None => Catalog::default(),
    };
    info!(ranks = catalog.ranks().len(), "Catalog loaded");

    let snapshot_file = config.state_path.clone().map(SnapshotFile::new);
    let initial = match &snapshot_file {
        Some(file) => file.load()?.unwrap_or_default(),
        None => {
            warn!("STATE_PATH not set, state will not survive a restart");
            Snapshot::default()
        }
    };
    info!(
        orders = initial.orders.all().len(),
        stripe_configured = initial.payment.is_configured(),
        "State restored"
    );

    let metrics = Arc::new(Metrics::new());
    let gateway = StripeGateway::new(&config.stripe_api_base, config.stripe_timeout, metrics.clone());
    info!(api = %config.stripe_api_base, timeout = ?config.stripe_timeout, "Payment processor configured");

    let backend = Arc::new(Backend::new(
        initial,
        catalog,
        gateway,
        snapshot_file,
        config.enforce_catalog_price,
        metrics,
    ));

    // Background: poll the processor for pending orders' sessions.
    if let Some(interval) = config.reconcile_interval {
        let reconciler_backend = backend.clone();
        let concurrency = config.reconcile_concurrency;
        tokio::spawn(async move {
            reconciler::run_reconciler(reconciler_backend, interval, concurrency).await;
        });
    } else {
        info!("Reconciler disabled");
    }

    let state = web::Data::from(backend.clone());
    let identity_header = web::Data::new(IdentityHeader(config.identity_header.clone()));
    let addr = (config.http_bind.clone(), config.http_port);

    info!(addr = %format!("{}:{}", addr.0, addr.1), "Starting HTTP server");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(identity_header.clone())
            .configure(api::routes)
    })
    .bind(addr)?
    .run()
    .await?;

    backend.flush_state().context("failed to write final state")?;
    info!("Shut down");
    Ok(())
}
