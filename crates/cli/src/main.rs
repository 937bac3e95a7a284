//! SDSM supervisor CLI
//!
//! A command-line tool for inspecting telemetry, reconciled processes and
//! deployment progress of a dedicated server supervisor, and for running
//! game server updates locally.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{debug, deploy, processes, progress, telemetry};
use std::path::PathBuf;

/// SDSM supervisor CLI
#[derive(Parser)]
#[command(name = "sdsm")]
#[command(author, version, about = "CLI for the SDSM Server Supervisor", long_about = None)]
pub struct Cli {
    /// Supervisor API URL (can also be set via SDSM_API_URL env var)
    #[arg(long, env = "SDSM_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Query the supervisor daemon
    #[command(subcommand)]
    Get(GetCommands),

    /// Parse a deployment log without a running daemon
    Progress {
        /// Path to the deployment log (defaults to <root>/logs/updates.log)
        #[arg(long)]
        log: Option<PathBuf>,

        /// Installation root
        #[arg(long, env = "SDSM_ROOT_PATH")]
        root: Option<PathBuf>,
    },

    /// Install or update the game server build through SteamCMD
    Deploy {
        /// Installation root
        #[arg(long, env = "SDSM_ROOT_PATH")]
        root: Option<PathBuf>,

        /// Steam application ID
        #[arg(long, env = "SDSM_STEAM_APP_ID", default_value = "600760")]
        app_id: String,

        /// Update the beta branch instead of the public release
        #[arg(long)]
        beta: bool,
    },

    /// Debug and troubleshooting commands
    #[command(subcommand)]
    Debug(DebugCommands),
}

#[derive(Subcommand)]
pub enum GetCommands {
    /// Latest host resource sample
    Host,

    /// Resource usage of every registered server
    Servers,

    /// List server processes found on the host
    Processes,

    /// Deployment progress reported by the daemon
    Progress,
}

#[derive(Subcommand)]
pub enum DebugCommands {
    /// Show supervisor component health
    Health,
}

fn resolve_root(flag: Option<PathBuf>, config: &config::Config) -> Result<PathBuf> {
    flag.or_else(|| config.root_path.clone())
        .ok_or_else(|| anyhow::anyhow!("No installation root; pass --root or set SDSM_ROOT_PATH"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let format = config.resolve_format(cli.format);

    match cli.command {
        Commands::Get(get_cmd) => {
            let client = client::ApiClient::new(&config.resolve_api_url(cli.api_url))?;
            match get_cmd {
                GetCommands::Host => telemetry::show_host(&client, format).await?,
                GetCommands::Servers => telemetry::show_servers(&client, format).await?,
                GetCommands::Processes => processes::show_processes(&client, format).await?,
                GetCommands::Progress => progress::show_remote(&client, format).await?,
            }
        }
        Commands::Progress { log, root } => {
            let log = match log {
                Some(log) => log,
                None => supervisor_lib::InstallLayout::new(resolve_root(root, &config)?)
                    .update_log_file(),
            };
            progress::show_local(&log, format)?;
        }
        Commands::Deploy { root, app_id, beta } => {
            let root = resolve_root(root, &config)?;
            deploy::update_game(root, &app_id, beta, format).await?;
        }
        Commands::Debug(debug_cmd) => {
            let client = client::ApiClient::new(&config.resolve_api_url(cli.api_url))?;
            match debug_cmd {
                DebugCommands::Health => debug::show_health(&client, format).await?,
            }
        }
    }

    Ok(())
}
