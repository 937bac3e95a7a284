//! Discovery by scanning the `/proc` process table

use super::{
    log_file_argument, log_summary, match_candidate, record_match, DiscoveryConfig,
    ExpectedDirFn, ProcessDiscovery,
};
use crate::models::ProcessMapping;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Reads `/proc/<pid>/cmdline` for every numeric process entry
#[derive(Debug)]
pub struct ProcfsDiscovery {
    config: DiscoveryConfig,
    proc_path: PathBuf,
}

impl ProcfsDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self::with_proc_path(config, "/proc")
    }

    /// Use an alternative proc root (for testing)
    pub fn with_proc_path(config: DiscoveryConfig, proc_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            proc_path: proc_path.into(),
        }
    }

    async fn list_pids(&self) -> Result<Vec<u32>> {
        let mut entries = tokio::fs::read_dir(&self.proc_path)
            .await
            .with_context(|| format!("Failed to read {}", self.proc_path.display()))?;

        let mut pids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
                .filter(|pid| *pid > 0)
            {
                pids.push(pid);
            }
        }
        pids.sort_unstable();
        Ok(pids)
    }

    async fn read_cmdline(&self, pid: u32) -> Option<Vec<String>> {
        let path = self.proc_path.join(pid.to_string()).join("cmdline");
        let data = tokio::fs::read(&path).await.ok()?;
        if data.is_empty() {
            return None;
        }
        Some(parse_cmdline(&data))
    }
}

/// Split a NUL-separated cmdline into arguments
pub(crate) fn parse_cmdline(data: &[u8]) -> Vec<String> {
    data.split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}

#[async_trait]
impl ProcessDiscovery for ProcfsDiscovery {
    async fn discover(&self, expected_dir_for: &ExpectedDirFn) -> ProcessMapping {
        let log_decisions = self.config.log_decisions;
        let mut mapping = ProcessMapping::new();
        if log_decisions {
            info!(
                proc_path = %self.proc_path.display(),
                binary = %self.config.binary_name,
                "Scanning process table for server processes"
            );
        }

        let pids = match self.list_pids().await {
            Ok(pids) => pids,
            Err(e) => {
                warn!(error = %e, "Process table unavailable");
                return mapping;
            }
        };

        for pid in pids {
            // Processes can exit between listing and reading
            let Some(args) = self.read_cmdline(pid).await else {
                continue;
            };
            if !args.iter().any(|a| a.contains(&self.config.binary_name)) {
                continue;
            }
            if log_decisions {
                info!(pid = pid, "Candidate process runs the server binary");
            }

            let Some(log_file) = log_file_argument(args.iter().map(String::as_str)) else {
                debug!(pid = pid, "Candidate has no -logFile argument");
                continue;
            };
            if log_decisions {
                info!(pid = pid, log_file = %log_file, "Candidate log file");
            }

            if let Some(server_id) = match_candidate(pid, &log_file, expected_dir_for, log_decisions)
            {
                record_match(&mut mapping, server_id, pid, log_decisions);
            }
        }

        log_summary(self.strategy(), &mapping, log_decisions);
        mapping
    }

    fn strategy(&self) -> &'static str {
        "procfs"
    }
}
