//! Local deployment commands

use anyhow::Result;
use std::path::PathBuf;
use supervisor_lib::deploy::{Branch, Deployer};
use supervisor_lib::{InstallLayout, StructuredLogger};

use crate::commands::progress;
use crate::output::{print_error, print_info, print_success, OutputFormat};

/// Update the game server build under `root` through SteamCMD
pub async fn update_game(
    root: PathBuf,
    app_id: &str,
    beta: bool,
    format: OutputFormat,
) -> Result<()> {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    let deployer = Deployer::new(InstallLayout::new(&root), app_id, StructuredLogger::new(host))?;
    let branch = if beta { Branch::Beta } else { Branch::Public };

    if format == OutputFormat::Table {
        print_info(&format!(
            "Updating {} build in {}",
            branch.as_str(),
            root.display()
        ));
    }

    let result = deployer.update_game(branch).await;
    let snapshot = deployer.progress();

    match result {
        Ok(()) => {
            if format == OutputFormat::Table {
                print_success("Game server updated");
            }
            progress::show_snapshot(&snapshot, format)
        }
        Err(e) => {
            print_error(&format!("Deployment failed: {}", e));
            print_info(&format!("See {}", deployer.log().path().display()));
            Err(e.into())
        }
    }
}
