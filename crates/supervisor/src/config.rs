//! Supervisor configuration

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use supervisor_lib::discovery::DiscoveryConfig;
use supervisor_lib::telemetry::SamplerConfig;
use tracing::warn;

/// Supervisor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Host name reported in structured events
    #[serde(default = "default_host_name")]
    pub host_name: String,

    /// Trusted installation root
    #[serde(default = "default_root_path")]
    pub root_path: PathBuf,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Steam application ID of the dedicated server
    #[serde(default = "default_steam_app_id")]
    pub steam_app_id: String,

    /// Use the managed query service for process discovery where available
    #[serde(default = "default_managed_query_enabled")]
    pub managed_query_enabled: bool,

    /// Telemetry sampling interval in seconds
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,

    /// Servers the supervisor tracks
    #[serde(default)]
    pub server_ids: Vec<u32>,
}

fn default_host_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn default_root_path() -> PathBuf {
    PathBuf::from("/srv/sdsm")
}

fn default_api_port() -> u16 {
    8080
}

fn default_steam_app_id() -> String {
    "600760".to_string()
}

fn default_managed_query_enabled() -> bool {
    true
}

fn default_sample_interval() -> u64 {
    5
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            host_name: default_host_name(),
            root_path: default_root_path(),
            api_port: default_api_port(),
            steam_app_id: default_steam_app_id(),
            managed_query_enabled: default_managed_query_enabled(),
            sample_interval_secs: default_sample_interval(),
            server_ids: Vec::new(),
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from an optional file and the environment.
    ///
    /// The file is `$SDSM_CONFIG` or `sdsm.toml`; `SDSM_*` variables override it.
    pub fn load() -> Result<Self> {
        let file = std::env::var("SDSM_CONFIG").unwrap_or_else(|_| "sdsm.toml".to_string());
        let config = config::Config::builder()
            .add_source(config::File::with_name(&file).required(false))
            .add_source(
                config::Environment::with_prefix("SDSM")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server_ids"),
            )
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|e| {
            warn!(error = %e, "Invalid configuration, using defaults");
            SupervisorConfig::default()
        }))
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            interval: Duration::from_secs(self.sample_interval_secs.max(1)),
            disk_path: self.root_path.clone(),
            ..SamplerConfig::default()
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            managed_query_enabled: self.managed_query_enabled,
            ..DiscoveryConfig::default()
        }
    }
}
