//! Raw operating system readings consumed by the sampler
//!
//! Readers return cumulative counters and point-in-time values only; all
//! rate math lives in [`super::rates`].

use super::rates;
use crate::paths;
use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use sysinfo::{Disks, Networks, Pid, ProcessRefreshKind, System};

/// Clock ticks per second used by `/proc/stat`
#[cfg(any(target_os = "linux", test))]
const USER_HZ: f64 = 100.0;

/// Cumulative host CPU time, in seconds summed across all CPUs
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuTimes {
    pub total: f64,
    pub idle: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl MemoryInfo {
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Usage of the volume holding a path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub mount_point: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
}

impl DiskUsage {
    /// Percent of the space usable by unprivileged users that is in use.
    /// Readings that count reserved blocks as used make this `used / total`.
    pub fn used_percent(&self) -> f64 {
        let usable = self.used_bytes + self.available_bytes;
        if usable == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / usable as f64 * 100.0
    }
}

/// Byte counters summed over every network interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkCounters {
    pub recv_bytes: u64,
    pub sent_bytes: u64,
    pub interfaces: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Cumulative CPU time and resident memory of one process
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessStats {
    pub cpu_seconds: f64,
    pub rss_bytes: u64,
}

/// Operating system readings used by the telemetry sampler
pub trait SystemSource: Send + Sync {
    fn cpu_times(&self) -> Result<CpuTimes>;
    fn memory(&self) -> Result<MemoryInfo>;
    fn disk_usage(&self, path: &Path) -> Result<DiskUsage>;
    fn network(&self) -> Result<NetworkCounters>;
    fn load_average(&self) -> Result<LoadAverage>;
    fn uptime_secs(&self) -> Result<u64>;
    fn process_count(&self) -> Result<u64>;
    /// Fails when the process no longer exists
    fn process(&self, pid: u32) -> Result<ProcessStats>;
    fn cpu_count(&self) -> usize;
}

/// Turns utilization percentages, each covering the time since the previous
/// refresh, into cumulative CPU seconds
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CpuClock {
    busy: f64,
    capacity: f64,
    last: Option<Instant>,
}

impl CpuClock {
    /// `percent` is in single-CPU units, so a busy four-core host reports 400
    pub(crate) fn advance(&mut self, percent: f64, cpus: usize, at: Instant) {
        if let Some(elapsed) = self.last.and_then(|last| at.checked_duration_since(last)) {
            let secs = elapsed.as_secs_f64();
            let capacity = secs * cpus.max(1) as f64;
            self.capacity += capacity;
            self.busy += rates::clamp(percent / 100.0 * secs, 0.0, capacity);
        }
        self.last = Some(at);
    }

    pub(crate) fn busy_seconds(&self) -> f64 {
        self.busy
    }

    #[cfg_attr(target_os = "linux", allow(dead_code))]
    pub(crate) fn times(&self) -> CpuTimes {
        CpuTimes {
            total: self.capacity,
            idle: self.capacity - self.busy,
        }
    }
}

/// Item whose mount point is the deepest one containing any of `targets`
pub(crate) fn deepest_mount<'a, T>(
    items: &'a [T],
    mount_of: impl Fn(&T) -> &Path,
    targets: &[PathBuf],
) -> Option<&'a T> {
    items
        .iter()
        .filter(|item| targets.iter().any(|t| t.starts_with(mount_of(*item))))
        .max_by_key(|item| mount_of(*item).components().count())
}

struct SysinfoState {
    system: System,
    /// Process counting refreshes every process, which would reset the
    /// CPU baselines of the servers tracked in `system`
    census: System,
    #[cfg_attr(target_os = "linux", allow(dead_code))]
    host_clock: CpuClock,
    process_clocks: HashMap<u32, CpuClock>,
}

/// [`SystemSource`] backed by `sysinfo`.
///
/// On Linux the host CPU counters come straight from `/proc/stat`, which
/// keeps the kernel's own time-in-mode accounting.
pub struct SysinfoSource {
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    proc_path: PathBuf,
    state: Mutex<SysinfoState>,
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoSource {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Use an alternative proc root for the Linux CPU counters
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self {
            proc_path: proc_path.into(),
            state: Mutex::new(SysinfoState {
                system,
                census: System::new(),
                host_clock: CpuClock::default(),
                process_clocks: HashMap::new(),
            }),
        }
    }
}

#[cfg(any(target_os = "linux", test))]
pub(crate) fn parse_cpu_times(stat: &str) -> Result<CpuTimes> {
    let line = stat
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| anyhow!("no aggregate cpu line"))?;
    let fields: Vec<f64> = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .context("Invalid cpu counter")?;
    if fields.len() < 4 {
        bail!("cpu line has {} fields", fields.len());
    }
    // guest and guest_nice are already included in user and nice
    let total: f64 = fields.iter().take(8).sum();
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0.0);
    Ok(CpuTimes {
        total: total / USER_HZ,
        idle: idle / USER_HZ,
    })
}

impl SystemSource for SysinfoSource {
    #[cfg(target_os = "linux")]
    fn cpu_times(&self) -> Result<CpuTimes> {
        let path = self.proc_path.join("stat");
        let stat = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        parse_cpu_times(&stat)
    }

    #[cfg(not(target_os = "linux"))]
    fn cpu_times(&self) -> Result<CpuTimes> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.system.refresh_cpu();
        let cpus = state.system.cpus().len().max(1);
        let average = state.system.global_cpu_info().cpu_usage() as f64;
        state
            .host_clock
            .advance(average * cpus as f64, cpus, Instant::now());
        Ok(state.host_clock.times())
    }

    fn memory(&self) -> Result<MemoryInfo> {
        let mut state = self.state.lock();
        state.system.refresh_memory();
        let total = state.system.total_memory();
        if total == 0 {
            bail!("total memory unavailable");
        }
        Ok(MemoryInfo {
            total_bytes: total,
            used_bytes: total.saturating_sub(state.system.available_memory()),
        })
    }

    fn disk_usage(&self, path: &Path) -> Result<DiskUsage> {
        let targets: Vec<PathBuf> = [fs::canonicalize(path).ok(), paths::absolute(path).ok()]
            .into_iter()
            .flatten()
            .collect();
        let disks = Disks::new_with_refreshed_list();
        let disk = deepest_mount(disks.list(), |d| d.mount_point(), &targets)
            .ok_or_else(|| anyhow!("No mounted volume holds {}", path.display()))?;
        let total = disk.total_space();
        let available = disk.available_space();
        Ok(DiskUsage {
            mount_point: disk.mount_point().display().to_string(),
            total_bytes: total,
            used_bytes: total.saturating_sub(available),
            available_bytes: available,
        })
    }

    fn network(&self) -> Result<NetworkCounters> {
        let networks = Networks::new_with_refreshed_list();
        let mut counters = NetworkCounters::default();
        for data in networks.list().values() {
            counters.recv_bytes = counters.recv_bytes.saturating_add(data.total_received());
            counters.sent_bytes = counters.sent_bytes.saturating_add(data.total_transmitted());
            counters.interfaces += 1;
        }
        Ok(counters)
    }

    fn load_average(&self) -> Result<LoadAverage> {
        let load = System::load_average();
        Ok(LoadAverage {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        })
    }

    fn uptime_secs(&self) -> Result<u64> {
        Ok(System::uptime())
    }

    fn process_count(&self) -> Result<u64> {
        let mut state = self.state.lock();
        state
            .census
            .refresh_processes_specifics(ProcessRefreshKind::new());
        Ok(state.census.processes().len() as u64)
    }

    fn process(&self, pid: u32) -> Result<ProcessStats> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let sys_pid = Pid::from_u32(pid);
        if !state.system.refresh_process(sys_pid) {
            state.process_clocks.remove(&pid);
            bail!("process {} not found", pid);
        }
        let process = state
            .system
            .process(sys_pid)
            .ok_or_else(|| anyhow!("process {} not found", pid))?;
        let cpus = state.system.cpus().len().max(1);
        let clock = state.process_clocks.entry(pid).or_default();
        clock.advance(process.cpu_usage() as f64, cpus, Instant::now());
        Ok(ProcessStats {
            cpu_seconds: clock.busy_seconds(),
            rss_bytes: process.memory(),
        })
    }

    fn cpu_count(&self) -> usize {
        self.state.lock().system.cpus().len().max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    const STAT: &str = "cpu  1000 50 300 8000 150 10 20 5 100 0\n\
                        cpu0 500 25 150 4000 75 5 10 2 50 0\n\
                        intr 12345\n";

    #[test]
    fn test_parse_cpu_times_excludes_guest() {
        let times = parse_cpu_times(STAT).unwrap();
        // 1000+50+300+8000+150+10+20+5 ticks
        assert!((times.total - 95.35).abs() < 1e-9);
        assert!((times.idle - 81.5).abs() < 1e-9);
        assert!(parse_cpu_times("intr 1\n").is_err());
    }

    #[test]
    fn test_cpu_clock_first_refresh_has_no_time() {
        let mut clock = CpuClock::default();
        clock.advance(350.0, 4, Instant::now());
        assert_eq!(clock.busy_seconds(), 0.0);
        assert_eq!(clock.times(), CpuTimes::default());
    }

    #[test]
    fn test_cpu_clock_integrates_host_usage() {
        let start = Instant::now();
        let mut clock = CpuClock::default();
        clock.advance(0.0, 4, start);
        // 25% of four CPUs for two seconds
        clock.advance(100.0, 4, start + Duration::from_secs(2));
        let times = clock.times();
        assert!((times.total - 8.0).abs() < 1e-9);
        assert!((times.idle - 6.0).abs() < 1e-9);
        assert!((clock.busy_seconds() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_cpu_clock_clamps_bogus_usage() {
        let start = Instant::now();
        let mut clock = CpuClock::default();
        clock.advance(0.0, 2, start);
        clock.advance(f64::NAN, 2, start + Duration::from_secs(1));
        clock.advance(-50.0, 2, start + Duration::from_secs(2));
        assert_eq!(clock.busy_seconds(), 0.0);
        clock.advance(900.0, 2, start + Duration::from_secs(3));
        assert!((clock.busy_seconds() - 2.0).abs() < 1e-9);
        // clock going backwards adds nothing
        clock.advance(100.0, 2, start);
        assert!((clock.busy_seconds() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_deepest_mount_wins() {
        let mounts = vec![
            PathBuf::from("/"),
            PathBuf::from("/srv"),
            PathBuf::from("/srv/sdsm"),
            PathBuf::from("/srv/sdsm-old"),
        ];
        let pick = |target: &str| {
            deepest_mount(&mounts, |m| m.as_path(), &[PathBuf::from(target)]).cloned()
        };
        assert_eq!(pick("/srv/sdsm/Server1"), Some(PathBuf::from("/srv/sdsm")));
        assert_eq!(pick("/srv/sdsmx"), Some(PathBuf::from("/srv")));
        assert_eq!(pick("/home"), Some(PathBuf::from("/")));
        assert_eq!(
            deepest_mount(&mounts[1..], |m| m.as_path(), &[PathBuf::from("/home")]),
            None
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_cpu_times_from_proc_root() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("stat"), STAT).unwrap();
        let source = SysinfoSource::with_proc_path(dir.path());
        assert!((source.cpu_times().unwrap().total - 95.35).abs() < 1e-9);
        assert!(SysinfoSource::with_proc_path(dir.path().join("missing"))
            .cpu_times()
            .is_err());
    }

    #[test]
    fn test_live_host_readings() {
        let source = SysinfoSource::new();
        let memory = source.memory().unwrap();
        assert!(memory.total_bytes > 0);
        assert!(memory.used_bytes <= memory.total_bytes);
        assert!(source.cpu_count() >= 1);
        assert!(source.process_count().unwrap() >= 1);
        assert!(source.network().is_ok());
    }

    #[test]
    fn test_live_process_readings() {
        let source = SysinfoSource::new();
        let first = source.process(std::process::id()).unwrap();
        assert!(first.rss_bytes > 0);
        let second = source.process(std::process::id()).unwrap();
        assert!(second.cpu_seconds >= first.cpu_seconds);
        assert!(source.process(u32::MAX - 1).is_err());
    }

    #[test]
    fn test_disk_usage_reports_containing_volume() {
        let dir = TempDir::new().unwrap();
        // Containers may hide the backing volume from the mount table
        if let Ok(usage) = SysinfoSource::new().disk_usage(dir.path()) {
            assert!(usage.used_bytes <= usage.total_bytes);
            assert!((0.0..=100.0).contains(&usage.used_percent()));
            assert!(!usage.mount_point.is_empty());
        }
    }

    #[test]
    fn test_disk_used_percent_uses_available_space() {
        let usage = DiskUsage {
            mount_point: "/".into(),
            total_bytes: 100,
            used_bytes: 50,
            available_bytes: 30,
        };
        assert!((usage.used_percent() - 62.5).abs() < 1e-9);
    }
}
