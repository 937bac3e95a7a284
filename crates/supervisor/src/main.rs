//! Server supervisor daemon
//!
//! Reconciles already-running dedicated server processes on startup, samples
//! host and per-server resource usage, and serves health, metrics and
//! read-only snapshots over HTTP.

use anyhow::Result;
use sdsm_supervisor::{api, config};
use std::sync::Arc;
use supervisor_lib::{
    discovery,
    health::HealthRegistry,
    observability::{StructuredLogger, SupervisorMetrics},
    registry::ServerTable,
    telemetry::TelemetrySampler,
    InstallLayout,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SUPERVISOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting sdsm-supervisor");

    // Load configuration
    let config = config::SupervisorConfig::load()?;
    info!(
        root_path = %config.root_path.display(),
        servers = config.server_ids.len(),
        "Supervisor configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();

    let metrics = SupervisorMetrics::new();
    let logger = StructuredLogger::new(&config.host_name);
    logger.log_startup(SUPERVISOR_VERSION, &config.root_path.display().to_string());

    let layout = InstallLayout::new(&config.root_path);
    let servers = Arc::new(ServerTable::with_servers(config.server_ids.iter().copied()));
    let sampler = Arc::new(
        TelemetrySampler::new(config.sampler_config(), servers.clone())
            .with_health(health_registry.clone()),
    );

    let app_state = Arc::new(api::AppState {
        health_registry: health_registry.clone(),
        metrics,
        logger: logger.clone(),
        layout,
        servers,
        sampler: sampler.clone(),
        discovery: discovery::platform_default(config.discovery_config()),
    });

    // Adopt servers that kept running across a supervisor restart
    let reconciled = app_state.reconcile().await;
    info!(
        mapped = reconciled.mapped,
        adopted = reconciled.adopted,
        "Initial reconciliation complete"
    );

    // Ready once the first tick records a host sample
    sampler.start();

    // Start health and metrics server
    let mut api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let reason = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            "SIGINT received"
        }
        result = &mut api_handle => {
            match result {
                Ok(Ok(())) => "API server exited",
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    "API server failed"
                }
                Err(e) => {
                    error!(error = %e, "API server task panicked");
                    "API server task panicked"
                }
            }
        }
    };

    logger.log_shutdown(reason);
    health_registry.begin_shutdown().await;
    sampler.stop().await;
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}
