//! Error types for operations that must fail closed

use crate::models::DeployComponent;
use std::path::PathBuf;
use thiserror::Error;

/// Rejections from path containment checks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("root path is required")]
    EmptyRoot,

    #[error("invalid control characters in path: {0:?}")]
    ControlCharacters(String),

    #[error("path escapes root {root}: {path}")]
    EscapesRoot { root: PathBuf, path: PathBuf },

    #[error("unable to resolve absolute path {path}: {reason}")]
    Unresolvable { path: PathBuf, reason: String },
}

/// Failures of a deployment tool invocation
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("invalid install dir: {0}")]
    InvalidInstallDir(#[source] PathError),

    #[error("invalid application id: {0:?}")]
    InvalidAppId(String),

    #[error("rejected argument vector: {0}")]
    RejectedArgument(String),

    #[error("steamcmd path containment failed: {0}")]
    ExecutableContainment(#[source] PathError),

    #[error("steamcmd directory escapes root after symlink resolution: {0}")]
    ExecutableDirEscapes(PathBuf),

    #[error("steamcmd executable missing: {path}: {reason}")]
    ExecutableMissing { path: PathBuf, reason: String },

    #[error("steamcmd executable is a symlink: {0}")]
    ExecutableIsSymlink(PathBuf),

    #[error("failed to start steamcmd: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("steamcmd exited with {status}{}", format_output(.output))]
    ExitStatus { status: String, output: Option<String> },

    #[error("cannot start {0} deployment while another one is running")]
    Busy(DeployComponent),
}

fn format_output(output: &Option<String>) -> String {
    match output {
        Some(text) if !text.trim().is_empty() => format!(": {}", text.trim()),
        _ => String::new(),
    }
}

impl DeployError {
    /// True for rejections raised before the external tool was started
    pub fn is_rejection(&self) -> bool {
        !matches!(self, DeployError::Spawn(_) | DeployError::ExitStatus { .. })
    }
}
