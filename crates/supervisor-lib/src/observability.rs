//! Observability infrastructure for the supervisor
//!
//! Provides:
//! - Prometheus metrics (sampling latency, host gauges, reconciliation and deployment counters)
//! - Structured event logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Gauge,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for a telemetry tick (in seconds)
const TICK_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

static GLOBAL_METRICS: OnceLock<SupervisorMetricsInner> = OnceLock::new();

struct SupervisorMetricsInner {
    telemetry_tick_seconds: Histogram,
    host_cpu_percent: Gauge,
    host_memory_percent: Gauge,
    host_disk_percent: Gauge,
    host_health_percent: Gauge,
    servers_sampled: IntGauge,
    telemetry_errors: IntCounter,
    processes_reconciled: IntGauge,
    discovery_failures: IntCounter,
    deployment_failures: IntCounter,
    progress_queries: IntCounter,
}

impl SupervisorMetricsInner {
    fn new() -> Self {
        Self {
            telemetry_tick_seconds: register_histogram!(
                "sdsm_telemetry_tick_seconds",
                "Time spent sampling host and server telemetry",
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register telemetry_tick_seconds"),

            host_cpu_percent: register_gauge!("sdsm_host_cpu_percent", "Host CPU utilization")
                .expect("Failed to register host_cpu_percent"),

            host_memory_percent: register_gauge!(
                "sdsm_host_memory_percent",
                "Host memory utilization"
            )
            .expect("Failed to register host_memory_percent"),

            host_disk_percent: register_gauge!(
                "sdsm_host_disk_percent",
                "Utilization of the volume holding the installation root"
            )
            .expect("Failed to register host_disk_percent"),

            host_health_percent: register_gauge!(
                "sdsm_host_health_percent",
                "Aggregate host health score"
            )
            .expect("Failed to register host_health_percent"),

            servers_sampled: register_int_gauge!(
                "sdsm_servers_sampled",
                "Number of servers with live resource usage"
            )
            .expect("Failed to register servers_sampled"),

            telemetry_errors: register_int_counter!(
                "sdsm_telemetry_errors_total",
                "Ticks where the host sample could not be read"
            )
            .expect("Failed to register telemetry_errors"),

            processes_reconciled: register_int_gauge!(
                "sdsm_processes_reconciled",
                "Server processes mapped by the last reconciliation pass"
            )
            .expect("Failed to register processes_reconciled"),

            discovery_failures: register_int_counter!(
                "sdsm_discovery_failures_total",
                "Process queries that failed after all retries"
            )
            .expect("Failed to register discovery_failures"),

            deployment_failures: register_int_counter!(
                "sdsm_deployment_failures_total",
                "Deployment tool invocations that were rejected or failed"
            )
            .expect("Failed to register deployment_failures"),

            progress_queries: register_int_counter!(
                "sdsm_progress_queries_total",
                "Deployment progress reconstructions"
            )
            .expect("Failed to register progress_queries"),
        }
    }
}

/// Supervisor metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct SupervisorMetrics {
    _private: (),
}

impl Default for SupervisorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SupervisorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SupervisorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SupervisorMetricsInner {
        GLOBAL_METRICS.get_or_init(SupervisorMetricsInner::new)
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().telemetry_tick_seconds.observe(duration_secs);
    }

    /// Publish the latest host sample
    pub fn set_host(&self, cpu: f64, memory: f64, disk: f64, health: f64) {
        let inner = self.inner();
        inner.host_cpu_percent.set(cpu);
        inner.host_memory_percent.set(memory);
        inner.host_disk_percent.set(disk);
        inner.host_health_percent.set(health);
    }

    pub fn set_servers_sampled(&self, count: i64) {
        self.inner().servers_sampled.set(count);
    }

    pub fn inc_telemetry_errors(&self) {
        self.inner().telemetry_errors.inc();
    }

    pub fn set_processes_reconciled(&self, count: i64) {
        self.inner().processes_reconciled.set(count);
    }

    pub fn inc_discovery_failures(&self) {
        self.inner().discovery_failures.inc();
    }

    pub fn inc_deployment_failures(&self) {
        self.inner().deployment_failures.inc();
    }

    pub fn inc_progress_queries(&self) {
        self.inner().progress_queries.inc();
    }
}

/// Structured logger for supervisor events
#[derive(Clone)]
pub struct StructuredLogger {
    host_name: String,
}

impl StructuredLogger {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, root_path: &str) {
        info!(
            event = "supervisor_started",
            host = %self.host_name,
            supervisor_version = %version,
            root_path = %root_path,
            "Server supervisor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "supervisor_shutdown",
            host = %self.host_name,
            reason = %reason,
            "Server supervisor shutting down"
        );
    }

    /// Log the outcome of a reconciliation pass
    pub fn log_processes_reconciled(&self, strategy: &str, mapped: usize, summary: &str) {
        info!(
            event = "processes_reconciled",
            host = %self.host_name,
            strategy = %strategy,
            mapped = mapped,
            summary = %summary,
            "Reconciled running server processes"
        );
    }

    pub fn log_deployment(&self, component: &str, elapsed_ms: u64, error: Option<&str>) {
        match error {
            None => info!(
                event = "deployment_completed",
                host = %self.host_name,
                component = %component,
                elapsed_ms = elapsed_ms,
                "Deployment stage completed"
            ),
            Some(error) => warn!(
                event = "deployment_failed",
                host = %self.host_name,
                component = %component,
                elapsed_ms = elapsed_ms,
                error = %error,
                "Deployment stage failed"
            ),
        }
    }
}
