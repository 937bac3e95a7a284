//! Deployment progress reconstructed from the append-only deployment log
//!
//! The log is the only durable record of a deployment, so progress is
//! re-derived from scratch on every call and never cached. Lines that do not
//! match a known shape are ignored, which also covers a partially written
//! final line while the deployment is still appending.

use super::duration;
use crate::models::{
    DeployComponent, DeploymentProgressSnapshot, DeploymentStage, StageStatus,
};
use chrono::{Local, NaiveDateTime};
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

struct LinePatterns {
    timestamp: Regex,
    started: Regex,
    completed_ok: Regex,
    completed_err: Regex,
    download: Regex,
}

fn patterns() -> &'static LinePatterns {
    static PATTERNS: OnceLock<LinePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| LinePatterns {
        timestamp: Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}):\s+")
            .expect("valid timestamp pattern"),
        started: Regex::new(r"^Deployment \(([^)]+)\) started$").expect("valid started pattern"),
        completed_ok: Regex::new(r"^Deployment \(([^)]+)\) completed successfully in (\S+)$")
            .expect("valid completion pattern"),
        completed_err: Regex::new(r"^Deployment \(([^)]+)\) completed with errors in (\S+)$")
            .expect("valid error pattern"),
        // Only state 0x61 (downloading) counts; validating/verifying states
        // restart their own counters and would show a regression.
        download: Regex::new(
            r"Update state \(0x61\)\s+downloading, progress:\s*([0-9]+(?:\.[0-9]+)?)\s*\(",
        )
        .expect("valid download pattern"),
    })
}

/// Parse the deployment log at `path`.
///
/// `in_progress_hint` is the caller's own view of whether a deployment is
/// running; the snapshot reports in-progress when either the hint is set or
/// any stage is still running. An unreadable log yields all stages pending.
pub fn parse_progress(path: &Path, in_progress_hint: bool) -> DeploymentProgressSnapshot {
    match File::open(path) {
        Ok(file) => parse_progress_from_reader(BufReader::new(file), in_progress_hint),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Deployment log unreadable, reporting pending stages");
            ProgressParser::new().finish(in_progress_hint)
        }
    }
}

/// Parse deployment log lines from any buffered reader
pub fn parse_progress_from_reader<R: BufRead>(
    mut reader: R,
    in_progress_hint: bool,
) -> DeploymentProgressSnapshot {
    let mut parser = ProgressParser::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => parser.feed(&String::from_utf8_lossy(&buf)),
            Err(e) => {
                debug!(error = %e, "Deployment log read interrupted");
                break;
            }
        }
    }
    parser.finish(in_progress_hint)
}

/// Line-by-line state machine over the deployment log
struct ProgressParser {
    stages: Vec<DeploymentStage>,
    current: Option<DeployComponent>,
    last_timestamp: Option<NaiveDateTime>,
}

impl ProgressParser {
    fn new() -> Self {
        Self {
            stages: DeployComponent::ALL
                .into_iter()
                .map(DeploymentStage::pending)
                .collect(),
            current: None,
            last_timestamp: None,
        }
    }

    fn stage_mut(&mut self, component: DeployComponent) -> &mut DeploymentStage {
        let index = DeployComponent::ALL
            .iter()
            .position(|c| *c == component)
            .unwrap_or_default();
        &mut self.stages[index]
    }

    fn feed(&mut self, raw: &str) {
        let patterns = patterns();
        let mut line = raw.trim();
        if line.is_empty() {
            return;
        }

        if let Some(caps) = patterns.timestamp.captures(line) {
            if let Ok(ts) = NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT) {
                self.last_timestamp = Some(ts);
            }
            line = &line[caps[0].len()..];
        }
        let ts = self.last_timestamp;

        if let Some(caps) = patterns.started.captures(line) {
            if let Some(component) = DeployComponent::from_token(&caps[1]) {
                let stage = self.stage_mut(component);
                stage.status = StageStatus::Running;
                stage.started_at = ts;
                stage.completed_at = None;
                stage.duration_millis = 0;
                stage.percent = 0;
                stage.last_line = Some("started".to_string());
                self.current = Some(component);
            }
            return;
        }

        if let Some(caps) = patterns.completed_ok.captures(line) {
            if let Some(component) = DeployComponent::from_token(&caps[1]) {
                let stage = self.stage_mut(component);
                stage.status = StageStatus::Completed;
                stage.completed_at = ts;
                stage.duration_millis = duration::parse_millis(&caps[2]);
                stage.percent = 100;
                stage.last_line = Some("completed".to_string());
                self.clear_current(component);
            }
            return;
        }

        if let Some(caps) = patterns.completed_err.captures(line) {
            if let Some(component) = DeployComponent::from_token(&caps[1]) {
                let stage = self.stage_mut(component);
                stage.status = StageStatus::Error;
                stage.completed_at = ts;
                stage.duration_millis = duration::parse_millis(&caps[2]);
                // percent stays where the stage stalled
                stage.last_line = Some("error".to_string());
                self.clear_current(component);
            }
            return;
        }

        if let Some(component) = self.current.filter(DeployComponent::reports_download_progress) {
            if let Some(caps) = patterns.download.captures(line) {
                if let Ok(value) = caps[1].parse::<f64>() {
                    let stage = self.stage_mut(component);
                    stage.percent = round_percent(value);
                    stage.last_line = Some("progress".to_string());
                }
            }
        }
    }

    fn clear_current(&mut self, component: DeployComponent) {
        if self.current == Some(component) {
            self.current = None;
        }
    }

    fn finish(self, in_progress_hint: bool) -> DeploymentProgressSnapshot {
        let any_running = self
            .stages
            .iter()
            .any(|s| s.status == StageStatus::Running);
        DeploymentProgressSnapshot {
            in_progress: in_progress_hint || any_running,
            overall_percent: overall_percent(&self.stages),
            last_updated: self
                .last_timestamp
                .unwrap_or_else(|| Local::now().naive_local()),
            stages: self.stages,
        }
    }
}

fn round_percent(value: f64) -> u8 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    value.round().min(100.0) as u8
}

/// Average percent over stages that have started. Pending stages are left
/// out of the denominator; completed stages count as 100.
pub fn overall_percent(stages: &[DeploymentStage]) -> u8 {
    let (started, total) = stages
        .iter()
        .filter(|s| s.status.has_started())
        .fold((0u32, 0u32), |(n, sum), s| {
            let pct = match s.status {
                StageStatus::Completed => 100,
                _ => u32::from(s.percent.min(100)),
            };
            (n + 1, sum + pct)
        });
    if started == 0 {
        return 0;
    }
    (total / started).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(text: &str) -> DeploymentProgressSnapshot {
        parse_progress_from_reader(Cursor::new(text.as_bytes().to_vec()), false)
    }

    #[test]
    fn test_completed_stage() {
        let snapshot = parse(
            "2024-05-01 10:00:00: Deployment (STEAMCMD) started\n\
             2024-05-01 10:00:05: Deployment (STEAMCMD) completed successfully in 5s\n",
        );
        let stage = snapshot.stage(DeployComponent::SteamCmd).unwrap();
        assert_eq!(stage.status, StageStatus::Completed);
        assert_eq!(stage.duration_millis, 5000);
        assert_eq!(stage.percent, 100);
        assert_eq!(
            stage.started_at,
            NaiveDateTime::parse_from_str("2024-05-01 10:00:00", TIMESTAMP_FORMAT).ok()
        );
        assert!(!snapshot.in_progress);
        assert_eq!(snapshot.overall_percent, 100);
    }

    #[test]
    fn test_download_progress_updates_current_stage() {
        let snapshot = parse(
            "2024-05-01 10:00:00: Deployment (STEAMCMD) completed successfully in 1s\n\
             2024-05-01 10:00:01: Deployment (RELEASE) started\n\
             Update state (0x61) downloading, progress: 42.00 (1234 / 5678)\n",
        );
        let release = snapshot.stage(DeployComponent::Release).unwrap();
        assert_eq!(release.status, StageStatus::Running);
        assert_eq!(release.percent, 42);
        assert_eq!(release.last_line.as_deref(), Some("progress"));
        assert!(snapshot.in_progress);

        let beta = snapshot.stage(DeployComponent::Beta).unwrap();
        assert_eq!(beta.status, StageStatus::Pending);
        assert_eq!(beta.percent, 0);
    }

    #[test]
    fn test_download_progress_ignores_other_states() {
        let snapshot = parse(
            "Deployment (RELEASE) started\n\
             Update state (0x61) downloading, progress: 80.00 (80 / 100)\n\
             Update state (0x81) verifying update, progress: 5.00 (5 / 100)\n",
        );
        let release = snapshot.stage(DeployComponent::Release).unwrap();
        assert_eq!(release.percent, 80);
    }

    #[test]
    fn test_download_progress_applies_to_steamcmd_stage() {
        let snapshot = parse(
            "Deployment (STEAMCMD) started\n\
             Update state (0x61) downloading, progress: 42.00 (1 / 2)\n",
        );
        let stage = snapshot.stage(DeployComponent::SteamCmd).unwrap();
        assert_eq!(stage.status, StageStatus::Running);
        assert_eq!(stage.percent, 42);
        let release = snapshot.stage(DeployComponent::Release).unwrap();
        assert_eq!(release.status, StageStatus::Pending);
        assert_eq!(release.percent, 0);
    }

    #[test]
    fn test_download_progress_ignored_for_other_stages() {
        let snapshot = parse(
            "Deployment (BEPINEX) started\n\
             Update state (0x61) downloading, progress: 42.00 (1 / 2)\n",
        );
        let stage = snapshot.stage(DeployComponent::BepInEx).unwrap();
        assert_eq!(stage.status, StageStatus::Running);
        assert_eq!(stage.percent, 0);
    }

    #[test]
    fn test_error_keeps_percent() {
        let snapshot = parse(
            "Deployment (BETA) started\n\
             Update state (0x61) downloading, progress: 37.6 (1 / 2)\n\
             Deployment (BETA) completed with errors in 2m3s\n",
        );
        let beta = snapshot.stage(DeployComponent::Beta).unwrap();
        assert_eq!(beta.status, StageStatus::Error);
        assert_eq!(beta.percent, 38);
        assert_eq!(beta.duration_millis, 123_000);
        assert_eq!(snapshot.overall_percent, 38);
    }

    #[test]
    fn test_progress_after_completion_is_ignored() {
        let snapshot = parse(
            "Deployment (RELEASE) started\n\
             Deployment (RELEASE) completed successfully in 10s\n\
             Update state (0x61) downloading, progress: 12.00 (1 / 2)\n",
        );
        let release = snapshot.stage(DeployComponent::Release).unwrap();
        assert_eq!(release.status, StageStatus::Completed);
        assert_eq!(release.percent, 100);
    }

    #[test]
    fn test_restart_resets_stage() {
        let snapshot = parse(
            "2024-05-01 09:00:00: Deployment (RELEASE) started\n\
             2024-05-01 09:10:00: Deployment (RELEASE) completed with errors in 10m0s\n\
             2024-05-01 11:00:00: Deployment (RELEASE) started\n",
        );
        let release = snapshot.stage(DeployComponent::Release).unwrap();
        assert_eq!(release.status, StageStatus::Running);
        assert_eq!(release.completed_at, None);
        assert_eq!(release.duration_millis, 0);
        assert_eq!(
            release.started_at,
            NaiveDateTime::parse_from_str("2024-05-01 11:00:00", TIMESTAMP_FORMAT).ok()
        );
    }

    #[test]
    fn test_timestamp_carried_forward() {
        let snapshot = parse(
            "2024-05-01 10:00:00: Starting update\n\
             Deployment (BEPINEX) started\n",
        );
        let stage = snapshot.stage(DeployComponent::BepInEx).unwrap();
        assert_eq!(
            stage.started_at,
            NaiveDateTime::parse_from_str("2024-05-01 10:00:00", TIMESTAMP_FORMAT).ok()
        );
        assert_eq!(
            snapshot.last_updated,
            NaiveDateTime::parse_from_str("2024-05-01 10:00:00", TIMESTAMP_FORMAT).unwrap()
        );
    }

    #[test]
    fn test_unknown_components_and_noise_ignored() {
        let snapshot = parse(
            "Deployment (MYSTERY) started\n\
             random chatter\n\
             Deployment (SCON) sta",
        );
        assert!(snapshot.stages.iter().all(|s| s.status == StageStatus::Pending));
        assert_eq!(snapshot.overall_percent, 0);
        assert!(!snapshot.in_progress);
    }

    #[test]
    fn test_overall_percent_excludes_pending() {
        let mut stages: Vec<DeploymentStage> = [
            DeployComponent::SteamCmd,
            DeployComponent::Release,
            DeployComponent::Beta,
        ]
        .into_iter()
        .map(DeploymentStage::pending)
        .collect();
        stages[0].status = StageStatus::Completed;
        stages[0].percent = 100;
        stages[1].status = StageStatus::Running;
        stages[1].percent = 40;
        assert_eq!(overall_percent(&stages), 70);
    }

    #[test]
    fn test_missing_log_reports_pending() {
        let snapshot = parse_progress(Path::new("/nonexistent/updates.log"), false);
        assert_eq!(snapshot.stages.len(), DeployComponent::ALL.len());
        assert!(snapshot.stages.iter().all(|s| s.status == StageStatus::Pending));
        assert_eq!(snapshot.overall_percent, 0);
        assert!(!snapshot.in_progress);
    }

    #[test]
    fn test_hint_keeps_in_progress() {
        let snapshot = parse_progress(Path::new("/nonexistent/updates.log"), true);
        assert!(snapshot.in_progress);
    }

    #[test]
    fn test_percent_bounds() {
        let snapshot = parse(
            "Deployment (RELEASE) started\n\
             Update state (0x61) downloading, progress: 250.00 (1 / 2)\n",
        );
        for stage in &snapshot.stages {
            assert!(stage.percent <= 100);
            if stage.status == StageStatus::Completed {
                assert_eq!(stage.percent, 100);
            }
        }
        assert_eq!(snapshot.stage(DeployComponent::Release).unwrap().percent, 100);
    }
}
