//! Deployment support: the log writer, progress parser, SteamCMD invoker
//! and the runner tying them together

pub mod duration;
pub mod log;
pub mod progress;
pub mod runner;
pub mod steamcmd;

pub use log::DeploymentLog;
pub use progress::{overall_percent, parse_progress, parse_progress_from_reader};
pub use runner::Deployer;
pub use steamcmd::{build_update_args, validate_args, Branch, SteamCmd};
