//! Core data models for the server supervisor

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping of logical server IDs to the OS processes discovered for them.
///
/// Rebuilt on every reconciliation pass and never persisted. A PID is mapped
/// to at most one server and the first mapping recorded for a server wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMapping {
    entries: BTreeMap<u32, u32>,
}

impl ProcessMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `server_id -> pid`. Returns false when the server already has a
    /// mapping or the PID is already claimed by another server.
    pub fn insert(&mut self, server_id: u32, pid: u32) -> bool {
        if self.entries.contains_key(&server_id) || self.server_for(pid).is_some() {
            return false;
        }
        self.entries.insert(server_id, pid);
        true
    }

    pub fn pid_for(&self, server_id: u32) -> Option<u32> {
        self.entries.get(&server_id).copied()
    }

    pub fn server_for(&self, pid: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|(_, p)| **p == pid)
            .map(|(id, _)| *id)
    }

    pub fn contains_server(&self, server_id: u32) -> bool {
        self.entries.contains_key(&server_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(server_id, pid)` pairs in server ID order
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.entries.iter().map(|(id, pid)| (*id, *pid))
    }

    /// Compact `id:pid` summary used in log lines
    pub fn summary(&self) -> String {
        self.iter()
            .map(|(id, pid)| format!("{}:{}", id, pid))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Host-wide resource snapshot, replaced wholesale on every sampling tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostTelemetrySample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_percent: f64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub network_in_bps: f64,
    pub network_out_bps: f64,
    pub network_in_bytes: u64,
    pub network_out_bytes: u64,
    pub network_interfaces: usize,
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub uptime_seconds: u64,
    pub process_count: u64,
    pub health_percent: f64,
    pub sampled_at: DateTime<Utc>,
}

/// Resource usage of one running server process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerResourceUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub memory_rss_bytes: u64,
    pub disk_usage_bytes: u64,
    pub volume_mount_point: String,
    pub sampled_at: DateTime<Utc>,
    pub disk_sampled_at: DateTime<Utc>,
}

/// One discrete unit of the install/update pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeployComponent {
    SteamCmd,
    Release,
    Beta,
    BepInEx,
    LaunchPad,
    Scon,
    Servers,
}

impl DeployComponent {
    /// Reporting order of stages in a progress snapshot
    pub const ALL: [DeployComponent; 7] = [
        DeployComponent::SteamCmd,
        DeployComponent::Release,
        DeployComponent::Beta,
        DeployComponent::BepInEx,
        DeployComponent::LaunchPad,
        DeployComponent::Scon,
        DeployComponent::Servers,
    ];

    /// Identifier as it appears in `Deployment (<ID>) ...` log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployComponent::SteamCmd => "STEAMCMD",
            DeployComponent::Release => "RELEASE",
            DeployComponent::Beta => "BETA",
            DeployComponent::BepInEx => "BEPINEX",
            DeployComponent::LaunchPad => "LAUNCHPAD",
            DeployComponent::Scon => "SCON",
            DeployComponent::Servers => "SERVERS",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DeployComponent::SteamCmd => "steamcmd",
            DeployComponent::Release => "rocketstation_DedicatedServer Release",
            DeployComponent::Beta => "rocketstation_DedicatedServer Beta",
            DeployComponent::BepInEx => "BepInEx",
            DeployComponent::LaunchPad => "Stationeers LaunchPad",
            DeployComponent::Scon => "SCON",
            DeployComponent::Servers => "Servers",
        }
    }

    /// Parse a log token, case-insensitively and ignoring surrounding whitespace
    pub fn from_token(token: &str) -> Option<Self> {
        let upper = token.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|c| c.as_str() == upper)
    }

    /// Stages driven by SteamCMD, whose download progress lines apply to them
    pub fn reports_download_progress(&self) -> bool {
        matches!(
            self,
            DeployComponent::SteamCmd | DeployComponent::Release | DeployComponent::Beta
        )
    }
}

impl std::fmt::Display for DeployComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl StageStatus {
    /// True once the stage has been started in the log
    pub fn has_started(&self) -> bool {
        !matches!(self, StageStatus::Pending)
    }
}

/// Parsed progress of a single deployment stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStage {
    pub component: DeployComponent,
    pub display_name: String,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<NaiveDateTime>,
    pub duration_millis: i64,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_line: Option<String>,
}

impl DeploymentStage {
    pub fn pending(component: DeployComponent) -> Self {
        Self {
            component,
            display_name: component.display_name().to_string(),
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_millis: 0,
            percent: 0,
            last_line: None,
        }
    }
}

/// Progress of a whole deployment, re-derived from the log on every query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentProgressSnapshot {
    pub in_progress: bool,
    pub overall_percent: u8,
    pub stages: Vec<DeploymentStage>,
    pub last_updated: NaiveDateTime,
}

impl DeploymentProgressSnapshot {
    pub fn stage(&self, component: DeployComponent) -> Option<&DeploymentStage> {
        self.stages.iter().find(|s| s.component == component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_first_match_wins() {
        let mut mapping = ProcessMapping::new();
        assert!(mapping.insert(1, 100));
        assert!(!mapping.insert(1, 200));
        assert_eq!(mapping.pid_for(1), Some(100));
    }

    #[test]
    fn test_mapping_pid_claimed_once() {
        let mut mapping = ProcessMapping::new();
        assert!(mapping.insert(1, 100));
        assert!(!mapping.insert(2, 100));
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.server_for(100), Some(1));
    }

    #[test]
    fn test_mapping_summary_is_sorted() {
        let mut mapping = ProcessMapping::new();
        mapping.insert(3, 30);
        mapping.insert(1, 10);
        assert_eq!(mapping.summary(), "1:10, 3:30");
    }

    #[test]
    fn test_component_tokens() {
        assert_eq!(
            DeployComponent::from_token(" steamcmd "),
            Some(DeployComponent::SteamCmd)
        );
        assert_eq!(DeployComponent::from_token("SCON"), Some(DeployComponent::Scon));
        assert_eq!(DeployComponent::from_token("UNKNOWN"), None);
        assert!(DeployComponent::Beta.reports_download_progress());
        assert!(DeployComponent::SteamCmd.reports_download_progress());
        assert!(!DeployComponent::BepInEx.reports_download_progress());
    }

    #[test]
    fn test_component_serializes_as_log_token() {
        let json = serde_json::to_string(&DeployComponent::BepInEx).unwrap();
        assert_eq!(json, "\"BEPINEX\"");
        let json = serde_json::to_string(&DeployComponent::SteamCmd).unwrap();
        assert_eq!(json, "\"STEAMCMD\"");
    }
}
