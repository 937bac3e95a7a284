//! Runs deployment stages against the install layout

use super::log::DeploymentLog;
use super::progress::parse_progress;
use super::steamcmd::{Branch, SteamCmd};
use crate::error::DeployError;
use crate::health::{Component, HealthRegistry};
use crate::layout::InstallLayout;
use crate::models::{DeployComponent, DeploymentProgressSnapshot};
use crate::observability::{StructuredLogger, SupervisorMetrics};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::warn;

/// Clears the in-progress flag even when the update future is dropped
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives game server updates and records them in the deployment log
pub struct Deployer {
    steamcmd: SteamCmd,
    log: DeploymentLog,
    logger: StructuredLogger,
    metrics: SupervisorMetrics,
    health: Option<HealthRegistry>,
    in_progress: AtomicBool,
}

impl Deployer {
    /// Open the deployment log under `layout` and bind SteamCMD to `app_id`
    pub fn new(
        layout: InstallLayout,
        app_id: impl Into<String>,
        logger: StructuredLogger,
    ) -> Result<Self> {
        let log = DeploymentLog::open(layout.update_log_file())?;
        Ok(Self {
            steamcmd: SteamCmd::new(layout, app_id),
            log,
            logger,
            metrics: SupervisorMetrics::new(),
            health: None,
            in_progress: AtomicBool::new(false),
        })
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn log(&self) -> &DeploymentLog {
        &self.log
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Update the `RELEASE` or `BETA` build through SteamCMD.
    ///
    /// Only one update runs at a time; a second call fails with
    /// [`DeployError::Busy`] without touching the log or health.
    pub async fn update_game(&self, branch: Branch) -> Result<(), DeployError> {
        let component = match branch {
            Branch::Public => DeployComponent::Release,
            Branch::Beta => DeployComponent::Beta,
        };

        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(component = %component, "Deployment already in progress");
            return Err(DeployError::Busy(component));
        }
        let guard = RunGuard(&self.in_progress);
        let started = Instant::now();
        let result = self
            .log
            .run_stage(component, self.steamcmd.update_game(branch, Some(&self.log)))
            .await;
        drop(guard);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => {
                self.logger.log_deployment(component.as_str(), elapsed_ms, None);
                if let Some(health) = &self.health {
                    health.set_healthy(Component::Deployment).await;
                }
            }
            Err(e) => {
                self.metrics.inc_deployment_failures();
                self.logger
                    .log_deployment(component.as_str(), elapsed_ms, Some(&e.to_string()));
                if let Some(health) = &self.health {
                    // Rejections never started the tool
                    if e.is_rejection() {
                        health
                            .set_degraded(Component::Deployment, e.to_string())
                            .await;
                    } else {
                        health
                            .set_unhealthy(Component::Deployment, e.to_string())
                            .await;
                    }
                }
            }
        }
        result
    }

    /// Progress reconstructed from this deployment's log
    pub fn progress(&self) -> DeploymentProgressSnapshot {
        self.metrics.inc_progress_queries();
        parse_progress(self.log.path(), self.is_in_progress())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentStatus;
    use crate::models::StageStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_tool_marks_stage_error() {
        let root = TempDir::new().unwrap();
        let health = HealthRegistry::new();
        let deployer = Deployer::new(
            InstallLayout::new(root.path()),
            "600760",
            StructuredLogger::new("test-host"),
        )
        .unwrap()
        .with_health(health.clone());

        let err = deployer.update_game(Branch::Public).await.unwrap_err();
        assert!(matches!(err, DeployError::ExecutableMissing { .. }));
        assert!(!deployer.is_in_progress());

        let snapshot = deployer.progress();
        assert!(!snapshot.in_progress);
        let release = snapshot.stage(DeployComponent::Release).unwrap();
        assert_eq!(release.status, StageStatus::Error);
        assert_eq!(
            health.status(Component::Deployment).await,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_update_refused_while_running() {
        let root = TempDir::new().unwrap();
        let health = HealthRegistry::new();
        let deployer = Deployer::new(
            InstallLayout::new(root.path()),
            "600760",
            StructuredLogger::new("test-host"),
        )
        .unwrap()
        .with_health(health.clone());
        deployer.in_progress.store(true, Ordering::SeqCst);

        let err = deployer.update_game(Branch::Public).await.unwrap_err();
        assert!(matches!(err, DeployError::Busy(DeployComponent::Release)));
        // The running deployment still owns the flag
        assert!(deployer.is_in_progress());
        assert_eq!(
            health.status(Component::Deployment).await,
            ComponentStatus::Healthy
        );
        assert_eq!(
            deployer.progress().stage(DeployComponent::Release).unwrap().status,
            StageStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_invalid_app_id_degrades_deployment() {
        let root = TempDir::new().unwrap();
        let health = HealthRegistry::new();
        let deployer = Deployer::new(
            InstallLayout::new(root.path()),
            "abc",
            StructuredLogger::new("test-host"),
        )
        .unwrap()
        .with_health(health.clone());

        let err = deployer.update_game(Branch::Beta).await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidAppId(_)));
        assert_eq!(
            health.status(Component::Deployment).await,
            ComponentStatus::Degraded
        );
        let snapshot = deployer.progress();
        assert_eq!(
            snapshot.stage(DeployComponent::Beta).unwrap().status,
            StageStatus::Error
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_update_completes_stage() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let layout = InstallLayout::new(root.path());
        let exe = layout.steamcmd_dir().join(SteamCmd::executable_name());
        std::fs::create_dir_all(layout.steamcmd_dir()).unwrap();
        std::fs::write(&exe, "#!/bin/sh\necho ok\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let deployer =
            Deployer::new(layout, "600760", StructuredLogger::new("test-host")).unwrap();
        deployer.update_game(Branch::Public).await.unwrap();

        let snapshot = deployer.progress();
        let release = snapshot.stage(DeployComponent::Release).unwrap();
        assert_eq!(release.status, StageStatus::Completed);
        assert_eq!(release.percent, 100);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concurrent_update_is_refused() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let layout = InstallLayout::new(root.path());
        let exe = layout.steamcmd_dir().join(SteamCmd::executable_name());
        std::fs::create_dir_all(layout.steamcmd_dir()).unwrap();
        std::fs::write(&exe, "#!/bin/sh\nsleep 1\necho ok\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let deployer =
            Deployer::new(layout, "600760", StructuredLogger::new("test-host")).unwrap();
        let (first, second) = tokio::join!(
            deployer.update_game(Branch::Public),
            deployer.update_game(Branch::Beta)
        );
        first.unwrap();
        assert!(matches!(second, Err(DeployError::Busy(DeployComponent::Beta))));
        assert!(!deployer.is_in_progress());

        let snapshot = deployer.progress();
        assert_eq!(
            snapshot.stage(DeployComponent::Release).unwrap().status,
            StageStatus::Completed
        );
        assert_eq!(
            snapshot.stage(DeployComponent::Beta).unwrap().status,
            StageStatus::Pending
        );
    }
}
