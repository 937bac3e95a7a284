//! Reconciliation of running server processes against logical server IDs
//!
//! A server process is recognised by the `-logFile <dir>/Server<N>_output.log`
//! argument it was launched with. A mapping is only accepted when the log
//! directory, after symlink resolution, equals the directory the supervisor
//! expects for server `N`. Two strategies exist: a direct `/proc` scan and a
//! managed query service for platforms that do not expose command lines
//! cheaply. Neither ever fails; problems degrade to "no mapping".

mod managed;
mod procfs;
mod retry;


pub use managed::{
    split_command_line, CimProcessQuery, ManagedQueryDiscovery, ProcessQuery, QueriedProcess,
};
pub use procfs::ProcfsDiscovery;
pub use retry::RetryPolicy;

use crate::models::ProcessMapping;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::info;

pub use async_trait::async_trait;

/// Expected log directory for a server ID
pub type ExpectedDirFn = dyn Fn(u32) -> PathBuf + Send + Sync;

/// Capability shared by every discovery strategy
#[async_trait]
pub trait ProcessDiscovery: Send + Sync {
    /// Find untracked server processes and map them to server IDs
    async fn discover(&self, expected_dir_for: &ExpectedDirFn) -> ProcessMapping;

    /// Short strategy name for logs and metrics
    fn strategy(&self) -> &'static str;
}

/// Configuration for process discovery
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Server binary name, without platform extension
    pub binary_name: String,
    /// Allow the managed query service to be used
    pub managed_query_enabled: bool,
    pub retry: RetryPolicy,
    /// Emit per-decision info logs
    pub log_decisions: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            binary_name: "rocketstation_DedicatedServer".to_string(),
            managed_query_enabled: true,
            retry: RetryPolicy::default(),
            log_decisions: true,
        }
    }
}

/// Pick the discovery strategy for the current platform
pub fn platform_default(config: DiscoveryConfig) -> Arc<dyn ProcessDiscovery> {
    if cfg!(windows) {
        Arc::new(ManagedQueryDiscovery::new(config, Arc::new(CimProcessQuery::new())))
    } else {
        Arc::new(ProcfsDiscovery::new(config))
    }
}

fn log_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^Server(\d+)_output\.log$").expect("valid log file pattern")
    })
}

/// Value following a `-logFile` flag, with surrounding quotes removed
pub(crate) fn log_file_argument<'a, I>(tokens: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut tokens = tokens.into_iter();
    while let Some(token) = tokens.next() {
        if token.eq_ignore_ascii_case("-logFile") {
            let value = tokens.next()?.trim().trim_matches(|c| c == '"' || c == '\'');
            return (!value.is_empty()).then(|| value.to_string());
        }
    }
    None
}

/// Split a log file path into its directory and base name. Both separators
/// are honoured so Windows command lines parse the same everywhere.
pub(crate) fn split_log_path(log_file: &str) -> (&str, &str) {
    match log_file.rfind(['/', '\\']) {
        Some(0) => (&log_file[..1], &log_file[1..]),
        Some(i) => (&log_file[..i], &log_file[i + 1..]),
        None => (".", log_file),
    }
}

/// Server ID encoded in a `Server<N>_output.log` base name
pub fn server_id_from_log_file(base_name: &str) -> Option<u32> {
    let caps = log_file_pattern().captures(base_name)?;
    caps[1].parse::<u32>().ok().filter(|id| *id > 0)
}

/// Compare directories after symlink resolution, case-insensitively.
/// A directory that cannot be resolved is compared as given.
pub fn same_dir(expected: &Path, actual: &Path) -> bool {
    let expected = std::fs::canonicalize(expected).unwrap_or_else(|_| expected.to_path_buf());
    let actual = std::fs::canonicalize(actual).unwrap_or_else(|_| actual.to_path_buf());
    if expected == actual {
        return true;
    }
    let fold = |p: &Path| {
        crate::paths::normalize(p)
            .to_string_lossy()
            .trim()
            .to_lowercase()
    };
    fold(&expected) == fold(&actual)
}

/// Match one candidate process. Returns the server ID when its log file
/// lives in the expected directory for that ID.
pub(crate) fn match_candidate(
    pid: u32,
    log_file: &str,
    expected_dir_for: &ExpectedDirFn,
    log_decisions: bool,
) -> Option<u32> {
    let (dir, base) = split_log_path(log_file);
    let server_id = server_id_from_log_file(base)?;
    if log_decisions {
        info!(pid = pid, server_id = server_id, "Process appears to be a managed server");
    }

    let expected = expected_dir_for(server_id);
    if !same_dir(&expected, Path::new(dir)) {
        if log_decisions {
            info!(
                pid = pid,
                server_id = server_id,
                expected = %expected.display(),
                actual = %dir,
                "Log directory mismatch, skipping process"
            );
        }
        return None;
    }
    Some(server_id)
}

/// Record a match, keeping the first mapping per server
pub(crate) fn record_match(
    mapping: &mut ProcessMapping,
    server_id: u32,
    pid: u32,
    log_decisions: bool,
) {
    if mapping.insert(server_id, pid) && log_decisions {
        info!(server_id = server_id, pid = pid, "Mapped server to process");
    }
}

pub(crate) fn log_summary(strategy: &str, mapping: &ProcessMapping, log_decisions: bool) {
    if !log_decisions {
        return;
    }
    if mapping.is_empty() {
        info!(strategy = strategy, "No running server processes found");
    } else {
        info!(
            strategy = strategy,
            count = mapping.len(),
            servers = %mapping.summary(),
            "Found running server processes"
        );
    }
}
