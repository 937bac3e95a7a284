//! Rate math over cumulative counters
//!
//! A rate needs a strictly earlier sample. Without one the result is zero,
//! never a spike computed against an implicit zero baseline.

use super::source::{CpuTimes, NetworkCounters};
use std::collections::HashMap;
use std::time::Instant;

/// Clamp into `[min, max]`; NaN and infinities map to `min`
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if !value.is_finite() {
        return min;
    }
    value.clamp(min, max)
}

pub fn clamp_percent(value: f64) -> f64 {
    clamp(value, 0.0, 100.0)
}

/// Host CPU utilization from one tick's deltas
pub fn cpu_percent(delta_total: f64, delta_idle: f64) -> f64 {
    if delta_total.is_nan() || delta_total <= 0.0 {
        return 0.0;
    }
    let used = (delta_total - delta_idle).max(0.0);
    clamp_percent(used / delta_total * 100.0)
}

/// Per-second rate of a counter. Zero on reset or non-positive elapsed time.
pub fn counter_rate(current: u64, previous: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs.is_nan() || elapsed_secs <= 0.0 || current < previous {
        return 0.0;
    }
    (current - previous) as f64 / elapsed_secs
}

/// Process CPU as a share of the host delta, allowing one 100% per CPU
pub fn process_cpu_percent(delta_process: f64, delta_host: f64, num_cpus: usize) -> f64 {
    if delta_host.is_nan() || delta_host <= 0.0 {
        return 0.0;
    }
    let ceiling = num_cpus.max(1) as f64 * 100.0;
    clamp(delta_process / delta_host * 100.0, 0.0, ceiling)
}

/// `100 - max(cpu, memory, disk)`; 100 when nothing is reported
pub fn health_percent(cpu: f64, memory: f64, disk: f64) -> f64 {
    let worst = [cpu, memory, disk]
        .into_iter()
        .filter(|v| v.is_finite() && *v > 0.0)
        .fold(0.0, f64::max);
    if worst == 0.0 {
        return 100.0;
    }
    clamp_percent(100.0 - worst)
}

/// Host CPU deltas for one tick, shared by every server sampled in it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostCpuDelta {
    pub total: f64,
    pub idle: f64,
}

/// Previous cumulative readings kept between ticks
#[derive(Debug, Default)]
pub struct RateState {
    host_cpu: Option<CpuTimes>,
    network: Option<(NetworkCounters, Instant)>,
    server_cpu: HashMap<u32, f64>,
}

impl RateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the reading and return the delta against the previous one
    pub fn update_host_cpu(&mut self, times: CpuTimes) -> Option<HostCpuDelta> {
        let previous = self.host_cpu.replace(times)?;
        Some(HostCpuDelta {
            total: times.total - previous.total,
            idle: times.idle - previous.idle,
        })
    }

    /// Store the counters and return `(in_bps, out_bps)`
    pub fn update_network(&mut self, counters: NetworkCounters, at: Instant) -> (f64, f64) {
        let Some((previous, previous_at)) = self.network.replace((counters, at)) else {
            return (0.0, 0.0);
        };
        let Some(elapsed) = at.checked_duration_since(previous_at) else {
            return (0.0, 0.0);
        };
        let secs = elapsed.as_secs_f64();
        (
            counter_rate(counters.recv_bytes, previous.recv_bytes, secs),
            counter_rate(counters.sent_bytes, previous.sent_bytes, secs),
        )
    }

    /// Store a process CPU reading and return its delta, if any
    pub fn update_process(&mut self, server_id: u32, cpu_seconds: f64) -> Option<f64> {
        let previous = self.server_cpu.insert(server_id, cpu_seconds)?;
        let delta = cpu_seconds - previous;
        (delta > 0.0).then_some(delta)
    }

    pub fn clear_process(&mut self, server_id: u32) {
        self.server_cpu.remove(&server_id);
    }

    /// Drop baselines for servers that no longer exist
    pub fn retain_processes(&mut self, keep: impl Fn(u32) -> bool) {
        self.server_cpu.retain(|id, _| keep(*id));
    }

    pub fn has_process(&self, server_id: u32) -> bool {
        self.server_cpu.contains_key(&server_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clamp_non_finite_to_lower_bound() {
        assert_eq!(clamp(f64::NAN, 0.0, 100.0), 0.0);
        assert_eq!(clamp(f64::INFINITY, 0.0, 100.0), 0.0);
        assert_eq!(clamp(f64::NEG_INFINITY, 5.0, 100.0), 5.0);
        assert_eq!(clamp(150.0, 0.0, 100.0), 100.0);
        assert_eq!(clamp(-3.0, 0.0, 100.0), 0.0);
    }

    #[test]
    fn test_cpu_percent() {
        assert_eq!(cpu_percent(100.0, 75.0), 25.0);
        assert_eq!(cpu_percent(0.0, 0.0), 0.0);
        assert_eq!(cpu_percent(100.0, 120.0), 0.0);
        assert_eq!(cpu_percent(f64::NAN, 1.0), 0.0);
    }

    #[test]
    fn test_counter_rate() {
        assert_eq!(counter_rate(3000, 1000, 2.0), 1000.0);
        assert_eq!(counter_rate(500, 1000, 2.0), 0.0);
        assert_eq!(counter_rate(3000, 1000, 0.0), 0.0);
        assert_eq!(counter_rate(3000, 1000, -1.0), 0.0);
    }

    #[test]
    fn test_process_cpu_percent_clamped_to_cpu_count() {
        for (process, host, cpus, expected) in [
            (1.0, 4.0, 4, 25.0),
            (8.0, 4.0, 1, 100.0),
            (8.0, 4.0, 2, 200.0),
            (30.0, 4.0, 4, 400.0),
            (-1.0, 4.0, 4, 0.0),
            (1.0, 0.0, 4, 0.0),
        ] {
            assert_eq!(process_cpu_percent(process, host, cpus), expected);
        }
    }

    #[test]
    fn test_health_percent() {
        assert_eq!(health_percent(0.0, 0.0, 0.0), 100.0);
        assert_eq!(health_percent(20.0, 65.0, 40.0), 35.0);
        assert_eq!(health_percent(f64::NAN, 10.0, 0.0), 90.0);
        assert_eq!(health_percent(100.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_first_reading_has_no_rate() {
        let mut state = RateState::new();
        assert_eq!(
            state.update_host_cpu(CpuTimes {
                total: 1_000_000.0,
                idle: 900_000.0
            }),
            None
        );
        let counters = NetworkCounters {
            recv_bytes: u64::MAX / 2,
            sent_bytes: 42,
            interfaces: 1,
        };
        assert_eq!(state.update_network(counters, Instant::now()), (0.0, 0.0));
        assert_eq!(state.update_process(1, 500.0), None);
    }

    #[test]
    fn test_second_reading_yields_rates() {
        let mut state = RateState::new();
        state.update_host_cpu(CpuTimes {
            total: 100.0,
            idle: 80.0,
        });
        let delta = state
            .update_host_cpu(CpuTimes {
                total: 110.0,
                idle: 85.0,
            })
            .unwrap();
        assert_eq!(delta.total, 10.0);
        assert_eq!(cpu_percent(delta.total, delta.idle), 50.0);

        let start = Instant::now();
        let mut counters = NetworkCounters {
            recv_bytes: 1000,
            sent_bytes: 1000,
            interfaces: 2,
        };
        state.update_network(counters, start);
        counters.recv_bytes = 11_000;
        counters.sent_bytes = 500;
        let (inbound, outbound) = state.update_network(counters, start + Duration::from_secs(5));
        assert_eq!(inbound, 2000.0);
        // counter reset
        assert_eq!(outbound, 0.0);
    }

    #[test]
    fn test_clear_process_forgets_baseline() {
        let mut state = RateState::new();
        state.update_process(7, 10.0);
        assert_eq!(state.update_process(7, 12.5), Some(2.5));
        state.clear_process(7);
        assert!(!state.has_process(7));
        assert_eq!(state.update_process(7, 20.0), None);
    }
}
