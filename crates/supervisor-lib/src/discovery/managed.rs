//! Discovery through the system management query service
//!
//! Used where process command lines are not available from lightweight
//! enumeration. The query can be slow, blocked by policy, or need elevated
//! rights, so it is retried on a bounded schedule and can be disabled.

use super::{
    log_file_argument, log_summary, match_candidate, record_match, DiscoveryConfig,
    ExpectedDirFn, ProcessDiscovery,
};
use crate::models::ProcessMapping;
use crate::observability::SupervisorMetrics;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};

/// One row returned by the process query
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueriedProcess {
    #[serde(default)]
    pub name: String,
    pub process_id: u32,
    /// Absent when the caller lacks rights to read it
    #[serde(default)]
    pub command_line: Option<String>,
}

/// Source of process rows filtered by image name
#[async_trait]
pub trait ProcessQuery: Send + Sync {
    async fn query(&self, image_name: &str) -> Result<Vec<QueriedProcess>>;
}

/// Queries `Win32_Process` through PowerShell's CIM cmdlets
#[derive(Debug, Clone)]
pub struct CimProcessQuery {
    shell: String,
}

impl Default for CimProcessQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl CimProcessQuery {
    pub fn new() -> Self {
        Self {
            shell: "powershell.exe".to_string(),
        }
    }

    fn script(image_name: &str) -> String {
        format!(
            "Get-CimInstance -ClassName Win32_Process -Filter \"Name='{}'\" | \
             Select-Object Name,ProcessId,CommandLine | ConvertTo-Json -Compress",
            image_name
        )
    }
}

/// Image names are interpolated into the query filter
fn is_safe_image_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Parse `ConvertTo-Json` output, which is a bare object for one row
pub(crate) fn parse_query_output(text: &str) -> Result<Vec<QueriedProcess>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let value: serde_json::Value =
        serde_json::from_str(text).context("Process query returned invalid JSON")?;
    let rows = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Null => Vec::new(),
        other => vec![other],
    };
    rows.into_iter()
        .map(|row| serde_json::from_value(row).context("Unexpected process row"))
        .collect()
}

#[async_trait]
impl ProcessQuery for CimProcessQuery {
    async fn query(&self, image_name: &str) -> Result<Vec<QueriedProcess>> {
        if !is_safe_image_name(image_name) {
            bail!("refusing to query unsafe image name {:?}", image_name);
        }
        let output = Command::new(&self.shell)
            .args(["-NoProfile", "-NonInteractive", "-Command"])
            .arg(Self::script(image_name))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to start {}", self.shell))?;

        if !output.status.success() {
            bail!(
                "process query exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_query_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Split a Windows command line the way the C runtime builds `argv`.
///
/// Only double quotes group. Backslashes are literal unless they precede a
/// quote: `2n` of them then yield `n` and the quote toggles quoting, `2n+1`
/// yield `n` and a literal quote.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    // `""` is an argument even though it adds no characters
    let mut started = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let mut slashes = 1;
                while chars.peek() == Some(&'\\') {
                    chars.next();
                    slashes += 1;
                }
                if chars.peek() == Some(&'"') {
                    current.extend(std::iter::repeat('\\').take(slashes / 2));
                    if slashes % 2 == 1 {
                        chars.next();
                        current.push('"');
                    }
                } else {
                    current.extend(std::iter::repeat('\\').take(slashes));
                }
                started = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                started = true;
            }
            ' ' | '\t' if !in_quotes => {
                if started {
                    out.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            _ => {
                current.push(c);
                started = true;
            }
        }
    }
    if started {
        out.push(current);
    }
    out
}

/// Discovery backed by a [`ProcessQuery`]
pub struct ManagedQueryDiscovery {
    config: DiscoveryConfig,
    query: Arc<dyn ProcessQuery>,
    metrics: SupervisorMetrics,
}

impl ManagedQueryDiscovery {
    pub fn new(config: DiscoveryConfig, query: Arc<dyn ProcessQuery>) -> Self {
        Self {
            config,
            query,
            metrics: SupervisorMetrics::new(),
        }
    }

    fn image_name(&self) -> String {
        format!("{}.exe", self.config.binary_name)
    }
}

#[async_trait]
impl ProcessDiscovery for ManagedQueryDiscovery {
    async fn discover(&self, expected_dir_for: &ExpectedDirFn) -> ProcessMapping {
        let log_decisions = self.config.log_decisions;
        let mut mapping = ProcessMapping::new();

        if !self.config.managed_query_enabled {
            if log_decisions {
                info!("Managed process query disabled by configuration, relying on PID records");
            }
            return mapping;
        }

        let image = self.image_name();
        if log_decisions {
            info!(image = %image, "Querying process service for server processes");
        }
        let query = self.query.clone();
        let rows = match self
            .config
            .retry
            .run("process query", || {
                let query = query.clone();
                let image = image.clone();
                async move { query.query(&image).await }
            })
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                self.metrics.inc_discovery_failures();
                warn!(
                    error = %e,
                    "Process query unavailable after retries, relying on PID records"
                );
                return mapping;
            }
        };

        for row in rows {
            let pid = row.process_id;
            if pid == 0 {
                continue;
            }
            let Some(command_line) = row.command_line.as_deref() else {
                if log_decisions {
                    info!(
                        pid = pid,
                        "Command line unavailable (insufficient permissions?), skipping process"
                    );
                }
                continue;
            };

            let tokens = split_command_line(command_line);
            let Some(log_file) = log_file_argument(tokens.iter().map(String::as_str)) else {
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
        "managed-query"
    }
}
