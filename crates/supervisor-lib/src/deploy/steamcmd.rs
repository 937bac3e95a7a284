//! SteamCMD invocation with an allow-listed argument vector
//!
//! Nothing here goes through a shell. The install directory must resolve
//! inside the installation root, the application ID must be numeric, and
//! every argv token is checked against a fixed allow-list. The executable
//! itself is resolved under the root and must not be a symlink. All checks
//! run before the child process is spawned.

use super::log::DeploymentLog;
use crate::error::{DeployError, PathError};
use crate::layout::InstallLayout;
use crate::paths::{self, has_control_characters};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// Steam branch to install
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Public,
    Beta,
}

impl Branch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Branch::Public => "public",
            Branch::Beta => "beta",
        }
    }
}

/// Argument vector for a validated app install/update
pub fn build_update_args(install_dir: &Path, app_id: &str, branch: Branch) -> Vec<String> {
    vec![
        "+force_install_dir".to_string(),
        install_dir.to_string_lossy().into_owned(),
        "+login".to_string(),
        "anonymous".to_string(),
        "+app_update".to_string(),
        app_id.to_string(),
        "-beta".to_string(),
        branch.as_str().to_string(),
        "validate".to_string(),
        "+quit".to_string(),
    ]
}

const STANDALONE_TOKENS: &[&str] = &[
    "+force_install_dir",
    "+login",
    "+app_update",
    "-beta",
    "beta",
    "public",
    "validate",
    "+quit",
    "anonymous",
];

/// Reject the whole vector if any token falls outside the allow-list
pub fn validate_args(args: &[String]) -> Result<(), DeployError> {
    if args.is_empty() {
        return Err(DeployError::RejectedArgument("no arguments provided".into()));
    }
    if args.iter().any(|a| has_control_characters(a)) {
        return Err(DeployError::RejectedArgument(
            "invalid control characters in argument".into(),
        ));
    }

    let mut tokens = args.iter().map(|a| a.trim());
    while let Some(token) = tokens.next() {
        match token {
            "+force_install_dir" => match tokens.next() {
                Some(dir) if is_install_dir_value(dir) => {}
                Some(other) => {
                    return Err(DeployError::RejectedArgument(format!(
                        "invalid install dir {:?}",
                        other
                    )))
                }
                None => {
                    return Err(DeployError::RejectedArgument(
                        "missing value for +force_install_dir".into(),
                    ))
                }
            },
            "+login" => match tokens.next() {
                Some("anonymous") => {}
                Some(_) => {
                    return Err(DeployError::RejectedArgument(
                        "only anonymous login supported".into(),
                    ))
                }
                None => {
                    return Err(DeployError::RejectedArgument("missing value for +login".into()))
                }
            },
            "+app_update" => match tokens.next() {
                Some(id) if is_all_digits(id) => {}
                Some(_) => {
                    return Err(DeployError::RejectedArgument("invalid app id value".into()))
                }
                None => {
                    return Err(DeployError::RejectedArgument(
                        "missing app id for +app_update".into(),
                    ))
                }
            },
            "-beta" => match tokens.next() {
                Some("beta") | Some("public") => {}
                Some(other) => {
                    return Err(DeployError::RejectedArgument(format!(
                        "invalid branch {:?}",
                        other
                    )))
                }
                None => {
                    return Err(DeployError::RejectedArgument("missing branch after -beta".into()))
                }
            },
            other if STANDALONE_TOKENS.contains(&other) => {}
            other => {
                return Err(DeployError::RejectedArgument(format!(
                    "unexpected token {:?}",
                    other
                )))
            }
        }
    }
    Ok(())
}

/// An absolute path that cannot be mistaken for a command or flag
fn is_install_dir_value(value: &str) -> bool {
    !value.starts_with(['+', '-']) && Path::new(value).is_absolute()
}

pub fn is_all_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

/// SteamCMD bound to one installation root and Steam application
#[derive(Debug, Clone)]
pub struct SteamCmd {
    layout: InstallLayout,
    app_id: String,
}

impl SteamCmd {
    pub fn new(layout: InstallLayout, app_id: impl Into<String>) -> Self {
        Self {
            layout,
            app_id: app_id.into(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn executable_name() -> &'static str {
        if cfg!(windows) {
            "steamcmd.exe"
        } else {
            "steamcmd.sh"
        }
    }

    /// Locate the SteamCMD executable under `<root>/bin/steamcmd`
    pub fn resolve_executable(&self) -> Result<PathBuf, DeployError> {
        let root = self.layout.root();
        let root_str = root.to_string_lossy();
        if has_control_characters(&root_str) {
            return Err(DeployError::ExecutableContainment(
                PathError::ControlCharacters(root_str.into_owned()),
            ));
        }
        let abs_root = paths::absolute(root).map_err(DeployError::ExecutableContainment)?;

        let steam_dir = paths::secure_join(&abs_root, Path::new("bin").join("steamcmd"))
            .map_err(DeployError::ExecutableContainment)?;
        let exec_path = paths::secure_join(&steam_dir, Self::executable_name())
            .map_err(DeployError::ExecutableContainment)?;

        // An unresolvable directory is left to the executable check below
        if let Ok(real_dir) = std::fs::canonicalize(&steam_dir) {
            let real_root = std::fs::canonicalize(&abs_root).unwrap_or_else(|_| abs_root.clone());
            if !real_dir.starts_with(&real_root) {
                return Err(DeployError::ExecutableDirEscapes(real_dir));
            }
        }

        let meta = std::fs::symlink_metadata(&exec_path).map_err(|e| {
            DeployError::ExecutableMissing {
                path: exec_path.clone(),
                reason: e.to_string(),
            }
        })?;
        if meta.file_type().is_symlink() {
            return Err(DeployError::ExecutableIsSymlink(exec_path));
        }
        Ok(exec_path)
    }

    /// Install or update the game server build for `branch`
    pub async fn update_game(
        &self,
        branch: Branch,
        log: Option<&DeploymentLog>,
    ) -> Result<(), DeployError> {
        let dir = match branch {
            Branch::Public => self.layout.release_dir(),
            Branch::Beta => self.layout.beta_dir(),
        };
        self.run_in(&dir, branch, log).await
    }

    /// Run an app update into `install_dir`, which must lie inside the root
    pub async fn run_in(
        &self,
        install_dir: &Path,
        branch: Branch,
        log: Option<&DeploymentLog>,
    ) -> Result<(), DeployError> {
        let clean_dir = paths::ensure_within(self.layout.root(), install_dir)
            .map_err(DeployError::InvalidInstallDir)?;

        let app_id = self.app_id.trim();
        if !is_all_digits(app_id) {
            return Err(DeployError::InvalidAppId(self.app_id.clone()));
        }

        let args = build_update_args(&clean_dir, app_id, branch);
        validate_args(&args)?;
        let exec_path = self.resolve_executable()?;

        if let Some(log) = log {
            log.write_line(format_args!(
                "Starting update for Steam ID: {} to {}",
                app_id,
                clean_dir.display()
            ));
        }
        info!(
            executable = %exec_path.display(),
            args = %args.join(" "),
            "Executing steamcmd"
        );

        let mut cmd = Command::new(&exec_path);
        cmd.args(&args).stdin(Stdio::null()).kill_on_drop(true);

        let streamed = match log.map(stream_targets) {
            Some(Ok((stdout, stderr))) => {
                cmd.stdout(stdout).stderr(stderr);
                true
            }
            Some(Err(e)) => {
                warn!(error = %e, "Deployment log handle unavailable, capturing steamcmd output");
                false
            }
            None => false,
        };

        let (status, captured) = if streamed {
            let status = cmd.status().await.map_err(|e| self.spawn_failed(e, log))?;
            (status, None)
        } else {
            let output = cmd.output().await.map_err(|e| self.spawn_failed(e, log))?;
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            (output.status, Some(text))
        };

        if let Some(text) = &captured {
            match log {
                Some(log) => log.write_line(format_args!("SteamCMD output: {}", text.trim_end())),
                None => info!(output = %text.trim_end(), "steamcmd output"),
            }
        }

        if !status.success() {
            warn!(status = %status, "steamcmd exited with failure");
            if let Some(log) = log {
                log.write_line(format_args!("SteamCMD error: {}", status));
            }
            return Err(DeployError::ExitStatus {
                status: status.to_string(),
                output: captured,
            });
        }

        if let Some(log) = log {
            log.write_line("rocketstation_DedicatedServer updated successfully");
        }
        info!(branch = branch.as_str(), "steamcmd update completed");
        Ok(())
    }

    fn spawn_failed(&self, e: std::io::Error, log: Option<&DeploymentLog>) -> DeployError {
        warn!(error = %e, "Failed to start steamcmd");
        if let Some(log) = log {
            log.write_line(format_args!("SteamCMD error: {}", e));
        }
        DeployError::Spawn(e)
    }
}

fn stream_targets(log: &DeploymentLog) -> std::io::Result<(Stdio, Stdio)> {
    let stdout = log.output_handle()?;
    let stderr = stdout.try_clone()?;
    Ok((Stdio::from(stdout), Stdio::from(stderr)))
}
