//! HTTP API for health checks, Prometheus metrics and supervisor snapshots

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use supervisor_lib::{
    deploy::parse_progress,
    discovery::ProcessDiscovery,
    health::{Component, ComponentStatus, HealthRegistry},
    models::{HostTelemetrySample, ProcessMapping, ServerResourceUsage},
    observability::{StructuredLogger, SupervisorMetrics},
    registry::{ServerState, ServerTable},
    telemetry::TelemetrySampler,
    InstallLayout,
};
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: SupervisorMetrics,
    pub logger: StructuredLogger,
    pub layout: InstallLayout,
    pub servers: Arc<ServerTable>,
    pub sampler: Arc<TelemetrySampler>,
    pub discovery: Arc<dyn ProcessDiscovery>,
}

/// Outcome of the startup reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub mapped: usize,
    /// Servers newly marked running
    pub adopted: usize,
}

impl AppState {
    async fn discover(&self) -> ProcessMapping {
        let expected = self.layout.expected_dir_fn();
        let mapping = self.discovery.discover(&expected).await;
        self.metrics.set_processes_reconciled(mapping.len() as i64);
        self.logger.log_processes_reconciled(
            self.discovery.strategy(),
            mapping.len(),
            &mapping.summary(),
        );
        mapping
    }

    /// Adopt server processes that outlived a supervisor restart.
    ///
    /// Runs once at startup and marks the daemon's reconciliation milestone.
    pub async fn reconcile(&self) -> Reconciliation {
        let mapping = self.discover().await;
        let adopted = self.servers.apply_mapping(&mapping);
        self.health_registry.mark_reconciled().await;
        Reconciliation {
            mapped: mapping.len(),
            adopted,
        }
    }

    /// Discovery result compared with the registry; adopts nothing
    pub async fn process_report(&self) -> ProcessesResponse {
        let mapping = self.discover().await;
        self.health_registry.set_healthy(Component::Discovery).await;
        ProcessesResponse::new(self.discovery.strategy(), &mapping, &self.servers.list())
    }
}

/// Host snapshot with the derived health score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostTelemetryResponse {
    pub health_percent: f64,
    pub sample: Option<HostTelemetrySample>,
}

/// One registered server with its latest usage, if running
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTelemetryEntry {
    pub server_id: u32,
    pub running: bool,
    pub pid: Option<u32>,
    pub usage: Option<ServerResourceUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub server_id: u32,
    pub pid: u32,
    /// The registry already tracks the server as running with this PID
    pub tracked: bool,
}

/// Server processes found by discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessesResponse {
    pub strategy: String,
    pub processes: Vec<ProcessEntry>,
}

impl ProcessesResponse {
    fn new(strategy: &str, mapping: &ProcessMapping, servers: &[ServerState]) -> Self {
        Self {
            strategy: strategy.to_string(),
            processes: mapping
                .iter()
                .map(|(server_id, pid)| ProcessEntry {
                    server_id,
                    pid,
                    tracked: servers
                        .iter()
                        .any(|s| s.id == server_id && s.running && s.pid == Some(pid)),
                })
                .collect(),
        }
    }
}

/// Health check response - returns 200 if healthy, 503 if degraded/unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

async fn host_telemetry(State(state): State<Arc<AppState>>) -> Json<HostTelemetryResponse> {
    Json(HostTelemetryResponse {
        health_percent: state.sampler.health_percent(),
        sample: state.sampler.host_sample(),
    })
}

async fn server_telemetry(State(state): State<Arc<AppState>>) -> Json<Vec<ServerTelemetryEntry>> {
    let entries = state
        .servers
        .list()
        .into_iter()
        .map(|server| ServerTelemetryEntry {
            server_id: server.id,
            running: server.running,
            pid: server.pid,
            usage: state.sampler.server_usage(server.id),
        })
        .collect();
    Json(entries)
}

async fn processes(State(state): State<Arc<AppState>>) -> Json<ProcessesResponse> {
    Json(state.process_report().await)
}

async fn deployment_progress(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics.inc_progress_queries();
    let path = state.layout.update_log_file();
    // Parsing reads the whole log; keep it off the async workers
    match tokio::task::spawn_blocking(move || parse_progress(&path, false)).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => {
            warn!(error = %e, "Deployment progress parse failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/telemetry/host", get(host_telemetry))
        .route("/api/v1/telemetry/servers", get(server_telemetry))
        .route("/api/v1/processes", get(processes))
        .route("/api/v1/deployment/progress", get(deployment_progress))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
