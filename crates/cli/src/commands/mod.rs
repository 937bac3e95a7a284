//! CLI command implementations

pub mod debug;
pub mod deploy;
pub mod processes;
pub mod progress;
pub mod telemetry;
