//! Deployment progress commands

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use std::time::Duration;
use supervisor_lib::deploy::{duration, parse_progress};
use supervisor_lib::{DeploymentProgressSnapshot, DeploymentStage, StageStatus};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, print_json, print_table, OutputFormat};

/// Row for the stages table
#[derive(Tabled)]
struct StageRow {
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Progress")]
    progress: String,
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Duration")]
    duration: String,
}

fn status_label(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Pending => "pending",
        StageStatus::Running => "running",
        StageStatus::Completed => "completed",
        StageStatus::Error => "error",
    }
}

fn stage_row(stage: &DeploymentStage) -> StageRow {
    let duration = if stage.duration_millis > 0 {
        duration::format(Duration::from_millis(stage.duration_millis as u64))
    } else {
        "-".to_string()
    };
    StageRow {
        stage: stage.display_name.clone(),
        status: color_status(status_label(stage.status)),
        progress: format!("{}%", stage.percent),
        started: stage
            .started_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string()),
        duration,
    }
}

fn render(snapshot: &DeploymentProgressSnapshot, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(snapshot);
    }

    let state = if snapshot.in_progress {
        "in progress".yellow()
    } else {
        "idle".green()
    };
    println!("{}", "Deployment Progress".bold());
    println!("{}", "=".repeat(50));
    println!("State:        {}", state);
    println!("Overall:      {}%", snapshot.overall_percent);
    println!(
        "Last update:  {}",
        snapshot.last_updated.format("%Y-%m-%d %H:%M:%S")
    );
    println!();
    print_table(
        snapshot.stages.iter().map(stage_row).collect(),
        "No deployment stages",
    );
    Ok(())
}

/// Show deployment progress as reported by the daemon
pub async fn show_remote(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let snapshot = client.deployment_progress().await?;
    render(&snapshot, format)
}

/// Parse a deployment log directly, without a running daemon
pub fn show_local(log: &Path, format: OutputFormat) -> Result<()> {
    if !log.exists() {
        anyhow::bail!("Deployment log not found: {}", log.display());
    }
    let snapshot = parse_progress(log, false);
    render(&snapshot, format).context("Failed to render deployment progress")
}

/// Print a snapshot produced by a local deployment
pub fn show_snapshot(snapshot: &DeploymentProgressSnapshot, format: OutputFormat) -> Result<()> {
    render(snapshot, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use supervisor_lib::DeployComponent;
    use tempfile::TempDir;

    #[test]
    fn test_stage_row_formats_duration() {
        colored::control::set_override(false);
        let mut stage = DeploymentStage::pending(DeployComponent::Release);
        stage.status = StageStatus::Completed;
        stage.percent = 100;
        stage.duration_millis = 125_000;

        let row = stage_row(&stage);
        assert_eq!(row.stage, "rocketstation_DedicatedServer Release");
        assert_eq!(row.status, "completed");
        assert_eq!(row.progress, "100%");
        assert_eq!(row.duration, "2m5s");
        assert_eq!(row.started, "-");
    }

    #[test]
    fn test_local_log_must_exist() {
        let dir = TempDir::new().unwrap();
        assert!(show_local(&dir.path().join("updates.log"), OutputFormat::Json).is_err());
    }

    #[test]
    fn test_local_log_renders() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("updates.log");
        std::fs::write(
            &log,
            "2024-05-01 10:00:00: Deployment (STEAMCMD) started\n\
             2024-05-01 10:00:02: Deployment (STEAMCMD) completed successfully in 2s\n",
        )
        .unwrap();
        assert!(show_local(&log, OutputFormat::Table).is_ok());
    }
}
