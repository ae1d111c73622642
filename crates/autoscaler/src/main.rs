//! Node fleet autoscaler daemon
//!
//! Runs the decision cycle engine on a timer and serves the HTTP API for
//! health, metrics, and operator tooling.

use anyhow::{Context, Result};
use autoscaler_lib::engine::Engine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod provider;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting autoscaler");

    let daemon_config = config::DaemonConfig::load()?;
    let policy = daemon_config.load_policy()?;

    // An invalid policy is fatal at startup
    let (registry, catalog, engine_config) = policy
        .build()
        .context("invalid autoscaler policy")?;
    info!(
        cluster = %engine_config.cluster,
        pools = registry.all().len(),
        shapes = catalog.len(),
        "Policy loaded"
    );

    let (provider, confirm_rx) = provider::SimulatedProvider::new();
    let engine = Arc::new(Engine::new(
        registry,
        catalog,
        provider.clone(),
        provider,
        engine_config,
    ));

    let (demand_tx, demand_rx) = mpsc::channel(1024);
    let feed_handle = engine.attach_demand_feed(demand_rx);

    tokio::spawn(provider::run_confirmations(
        Arc::clone(&engine),
        confirm_rx,
        Duration::from_secs(daemon_config.confirm_delay_secs),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let engine_handle = tokio::spawn(Arc::clone(&engine).run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(Arc::clone(&engine), demand_tx));
    tokio::spawn(api::serve(daemon_config.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(());
    let _ = engine_handle.await;
    feed_handle.abort();

    Ok(())
}
