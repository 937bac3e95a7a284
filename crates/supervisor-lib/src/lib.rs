//! Supervisor library for a fleet of dedicated game servers
//!
//! This crate provides the core functionality for:
//! - Path containment and secure SteamCMD invocation
//! - Deployment progress parsing from the update log
//! - Reconciling running server processes after a restart
//! - Host and per-server resource telemetry
//! - Health checks and observability

pub mod deploy;
pub mod discovery;
pub mod error;
pub mod health;
pub mod layout;
pub mod models;
pub mod observability;
pub mod paths;
pub mod registry;
pub mod telemetry;

pub use error::{DeployError, PathError};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, NotReady,
    ReadinessResponse,
};
pub use layout::InstallLayout;
pub use models::*;
pub use observability::{StructuredLogger, SupervisorMetrics};
pub use registry::{ServerRegistry, ServerState, ServerTable};
