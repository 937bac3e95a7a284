//! Recurring host and per-server resource sampler

use super::rates::{self, HostCpuDelta, RateState};
use super::source::{DiskUsage, SysinfoSource, SystemSource};
use crate::health::{Component, HealthRegistry};
use crate::models::{HostTelemetrySample, ServerResourceUsage};
use crate::observability::SupervisorMetrics;
use crate::registry::{ServerRegistry, ServerState};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the telemetry sampler
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Sampling period (default: 5 seconds)
    pub interval: Duration,
    /// Path whose volume is reported as host disk usage
    pub disk_path: PathBuf,
    /// Root of the proc filesystem, read for host CPU counters on Linux
    pub proc_path: PathBuf,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            disk_path: PathBuf::from("/"),
            proc_path: PathBuf::from("/proc"),
        }
    }
}

/// Host readings of one tick that per-server sampling reuses
#[derive(Debug, Clone, Default)]
struct TickContext {
    cpu_delta: Option<HostCpuDelta>,
    memory_total: u64,
    disk: Option<DiskUsage>,
}

/// Summary of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub host_sampled: bool,
    pub servers_sampled: usize,
}

struct SamplerShared {
    config: SamplerConfig,
    source: Arc<dyn SystemSource>,
    registry: Arc<dyn ServerRegistry>,
    rates: Mutex<RateState>,
    host: RwLock<Option<HostTelemetrySample>>,
    usage: DashMap<u32, ServerResourceUsage>,
    metrics: SupervisorMetrics,
}

struct RunningTask {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Background sampler owning the latest host sample and per-server usage.
///
/// Readers get copies; the sampler replaces the host sample wholesale each
/// tick and removes a server's usage as soon as it is seen stopped.
pub struct TelemetrySampler {
    shared: Arc<SamplerShared>,
    health: Option<HealthRegistry>,
    task: Mutex<Option<RunningTask>>,
}

impl TelemetrySampler {
    /// Sampler reading the local host
    pub fn new(config: SamplerConfig, registry: Arc<dyn ServerRegistry>) -> Self {
        let source = Arc::new(SysinfoSource::with_proc_path(config.proc_path.clone()));
        Self::with_source(config, source, registry)
    }

    pub fn with_source(
        config: SamplerConfig,
        source: Arc<dyn SystemSource>,
        registry: Arc<dyn ServerRegistry>,
    ) -> Self {
        Self {
            shared: Arc::new(SamplerShared {
                config,
                source,
                registry,
                rates: Mutex::new(RateState::new()),
                host: RwLock::new(None),
                usage: DashMap::new(),
                metrics: SupervisorMetrics::new(),
            }),
            health: None,
            task: Mutex::new(None),
        }
    }

    /// Report tick health to the registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Start the background loop. A no-op while already running.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("Telemetry sampler already running");
            return;
        }

        let (shutdown, rx) = broadcast::channel(1);
        let shared = self.shared.clone();
        let health = self.health.clone();
        info!(
            interval_secs = shared.config.interval.as_secs_f64(),
            "Starting telemetry sampler"
        );
        let handle = tokio::spawn(run_loop(shared, health, rx));
        *task = Some(RunningTask { shutdown, handle });
    }

    /// Signal the loop to exit and wait until it has.
    ///
    /// An in-flight tick finishes first; nothing is sampled after this returns.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        let _ = task.shutdown.send(());
        if let Err(e) = task.handle.await {
            warn!(error = %e, "Telemetry sampler task ended abnormally");
        }
        info!("Telemetry sampler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Run one tick on the calling thread
    pub fn sample_now(&self) -> TickOutcome {
        self.shared.tick()
    }

    /// Latest host sample, `None` before the first successful tick
    pub fn host_sample(&self) -> Option<HostTelemetrySample> {
        self.shared.host.read().clone()
    }

    /// Latest health score, 100 before the first sample
    pub fn health_percent(&self) -> f64 {
        self.host_sample()
            .map(|s| rates::clamp_percent(s.health_percent))
            .unwrap_or(100.0)
    }

    pub fn server_usage(&self, server_id: u32) -> Option<ServerResourceUsage> {
        self.shared.usage.get(&server_id).map(|r| r.clone())
    }

    pub fn all_server_usage(&self) -> BTreeMap<u32, ServerResourceUsage> {
        self.shared
            .usage
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect()
    }
}

async fn run_loop(
    shared: Arc<SamplerShared>,
    health: Option<HealthRegistry>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(shared.config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let tick_shared = shared.clone();
                let outcome = match tokio::task::spawn_blocking(move || tick_shared.tick()).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(error = %e, "Telemetry tick panicked");
                        continue;
                    }
                };
                if let Some(health) = &health {
                    if outcome.host_sampled {
                        health.record_host_sample().await;
                    } else {
                        health
                            .set_degraded(Component::Telemetry, "host CPU counters unavailable")
                            .await;
                    }
                }
            }
            _ = shutdown.recv() => {
                debug!("Telemetry sampler received shutdown signal");
                break;
            }
        }
    }
}

impl SamplerShared {
    fn tick(&self) -> TickOutcome {
        let started = Instant::now();
        let context = self.sample_host();
        let host_sampled = context.is_some();
        let context = context.unwrap_or_default();

        let servers = self.registry.servers();
        let known: HashSet<u32> = servers.iter().map(|s| s.id).collect();
        let mut servers_sampled = 0;
        for server in &servers {
            if self.sample_server(server, &context) {
                servers_sampled += 1;
            }
        }

        // Servers removed from the registry
        self.usage.retain(|id, _| known.contains(id));
        self.rates.lock().retain_processes(|id| known.contains(&id));

        self.metrics
            .observe_tick_latency(started.elapsed().as_secs_f64());
        self.metrics.set_servers_sampled(servers_sampled as i64);
        TickOutcome {
            host_sampled,
            servers_sampled,
        }
    }

    fn sample_host(&self) -> Option<TickContext> {
        let source = &self.source;
        let cpu_times = match source.cpu_times() {
            Ok(times) => times,
            Err(e) => {
                warn!(error = %e, "Host CPU counters unavailable, keeping previous sample");
                self.metrics.inc_telemetry_errors();
                return None;
            }
        };
        let cpu_delta = self.rates.lock().update_host_cpu(cpu_times);
        let cpu_percent = cpu_delta
            .map(|d| rates::cpu_percent(d.total, d.idle))
            .unwrap_or(0.0);

        let memory = source
            .memory()
            .map_err(|e| debug!(error = %e, "Memory reading unavailable"))
            .unwrap_or_default();
        let disk = source
            .disk_usage(&self.config.disk_path)
            .map_err(|e| debug!(error = %e, "Disk reading unavailable"))
            .ok();
        let network = source
            .network()
            .map_err(|e| debug!(error = %e, "Network counters unavailable"))
            .ok();
        let (network_in_bps, network_out_bps) = match network {
            Some(counters) => self.rates.lock().update_network(counters, Instant::now()),
            None => (0.0, 0.0),
        };
        let network = network.unwrap_or_default();
        let load = source.load_average().unwrap_or_default();
        let uptime_seconds = source.uptime_secs().unwrap_or_default();
        let process_count = source.process_count().unwrap_or_default();

        let memory_percent = rates::clamp_percent(memory.used_percent());
        let disk_percent = disk
            .as_ref()
            .map(|d| rates::clamp_percent(d.used_percent()))
            .unwrap_or(0.0);
        let health_percent = rates::health_percent(cpu_percent, memory_percent, disk_percent);

        let sample = HostTelemetrySample {
            cpu_percent,
            memory_percent,
            memory_used_bytes: memory.used_bytes,
            memory_total_bytes: memory.total_bytes,
            disk_percent,
            disk_used_bytes: disk.as_ref().map(|d| d.used_bytes).unwrap_or(0),
            disk_total_bytes: disk.as_ref().map(|d| d.total_bytes).unwrap_or(0),
            network_in_bps,
            network_out_bps,
            network_in_bytes: network.recv_bytes,
            network_out_bytes: network.sent_bytes,
            network_interfaces: network.interfaces,
            load1: load.one,
            load5: load.five,
            load15: load.fifteen,
            uptime_seconds,
            process_count,
            health_percent,
            sampled_at: Utc::now(),
        };
        self.metrics
            .set_host(cpu_percent, memory_percent, disk_percent, health_percent);
        *self.host.write() = Some(sample);

        Some(TickContext {
            cpu_delta,
            memory_total: memory.total_bytes,
            disk,
        })
    }

    /// Returns true when usage was recorded for the server
    fn sample_server(&self, server: &ServerState, context: &TickContext) -> bool {
        let pid = match server.pid {
            Some(pid) if server.running && pid > 0 => pid,
            _ => {
                self.clear_server(server.id, "not running");
                return false;
            }
        };
        let stats = match self.source.process(pid) {
            Ok(stats) => stats,
            Err(e) => {
                debug!(server_id = server.id, pid = pid, error = %e, "Server process unavailable");
                self.clear_server(server.id, "process unavailable");
                return false;
            }
        };

        let process_delta = self.rates.lock().update_process(server.id, stats.cpu_seconds);
        let cpu_percent = match (process_delta, context.cpu_delta) {
            (Some(process), Some(host)) => {
                rates::process_cpu_percent(process, host.total, self.source.cpu_count())
            }
            _ => 0.0,
        };
        let memory_percent = if context.memory_total > 0 {
            rates::clamp_percent(stats.rss_bytes as f64 / context.memory_total as f64 * 100.0)
        } else {
            0.0
        };

        // Disk usage is per volume, shared by every server on it
        let (disk_percent, disk_usage_bytes, volume_mount_point) = match &context.disk {
            Some(disk) => (
                rates::clamp_percent(disk.used_percent()),
                disk.used_bytes,
                disk.mount_point.clone(),
            ),
            None => (0.0, 0, String::new()),
        };

        let now = Utc::now();
        self.usage.insert(
            server.id,
            ServerResourceUsage {
                cpu_percent,
                memory_percent,
                disk_percent,
                memory_rss_bytes: stats.rss_bytes,
                disk_usage_bytes,
                volume_mount_point,
                sampled_at: now,
                disk_sampled_at: now,
            },
        );
        true
    }

    fn clear_server(&self, server_id: u32, reason: &str) {
        self.rates.lock().clear_process(server_id);
        if self.usage.remove(&server_id).is_some() {
            debug!(server_id = server_id, reason = reason, "Cleared server resource usage");
        }
    }
}

impl Drop for TelemetrySampler {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.handle.abort();
        }
    }
}
