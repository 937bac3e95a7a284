//! Append-only deployment log writer

use super::duration;
use crate::models::DeployComponent;
use anyhow::{Context, Result};
use chrono::Local;
use parking_lot::Mutex;
use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Timestamped line writer shared by every stage of a deployment.
///
/// Lines land as `YYYY-MM-DD HH:MM:SS: <message>` in local time, which is
/// the shape the progress parser reads back.
pub struct DeploymentLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl DeploymentLog {
    /// Open `path` for appending, creating parent directories as needed
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open deployment log {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line. Write failures are logged, not returned;
    /// a broken log must not abort a deployment.
    pub fn write_line(&self, message: impl Display) {
        let line = format!("{}: {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"), message);
        let mut file = self.file.lock();
        if let Err(e) = file.write_all(line.as_bytes()).and_then(|_| file.flush()) {
            warn!(path = %self.path.display(), error = %e, "Failed to write deployment log line");
        }
    }

    pub fn stage_started(&self, component: DeployComponent) {
        self.write_line(format_args!("Deployment ({}) started", component));
    }

    pub fn stage_completed(&self, component: DeployComponent, elapsed: Duration) {
        self.write_line(format_args!(
            "Deployment ({}) completed successfully in {}",
            component,
            duration::format(elapsed)
        ));
    }

    pub fn stage_failed(&self, component: DeployComponent, elapsed: Duration) {
        self.write_line(format_args!(
            "Deployment ({}) completed with errors in {}",
            component,
            duration::format(elapsed)
        ));
    }

    /// Independent handle to the log file for streaming child process output
    pub fn output_handle(&self) -> std::io::Result<File> {
        self.file.lock().try_clone()
    }

    /// Bracket one deployment stage with its started and completion lines
    pub async fn run_stage<F, T, E>(&self, component: DeployComponent, stage: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let started = Instant::now();
        self.stage_started(component);
        info!(component = %component, "Deployment stage started");

        let result = stage.await;
        let elapsed = started.elapsed();
        match &result {
            Ok(_) => {
                self.stage_completed(component, elapsed);
                info!(
                    component = %component,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Deployment stage completed"
                );
            }
            Err(e) => {
                self.write_line(format_args!("{} error: {}", component.display_name(), e));
                self.stage_failed(component, elapsed);
                warn!(component = %component, error = %e, "Deployment stage failed");
            }
        }
        result
    }
}
