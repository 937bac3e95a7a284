//! Host and per-server resource telemetry
//!
//! [`TelemetrySampler`] runs a fixed-period background loop that reads
//! cumulative counters from a [`SystemSource`], turns them into rates and
//! percentages, and publishes the results for concurrent readers.

pub mod rates;
pub mod sampler;
pub mod source;

pub use sampler::{SamplerConfig, TelemetrySampler, TickOutcome};
pub use source::{
    CpuTimes, DiskUsage, LoadAverage, MemoryInfo, NetworkCounters, ProcessStats, SysinfoSource,
    SystemSource,
};
