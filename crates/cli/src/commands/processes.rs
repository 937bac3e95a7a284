//! Process reconciliation command

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{print_info, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct ProcessRow {
    #[tabled(rename = "Server")]
    server: String,
    #[tabled(rename = "PID")]
    pid: u32,
    #[tabled(rename = "Tracked")]
    tracked: String,
}

/// Show the server processes discovery finds on the host
pub async fn show_processes(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let list = client.processes().await?;

    if format == OutputFormat::Json {
        return print_json(&list);
    }

    println!("{} ({})", "Server Processes".bold(), list.strategy.cyan());
    let rows = list
        .processes
        .iter()
        .map(|p| ProcessRow {
            server: format!("Server{}", p.server_id),
            pid: p.pid,
            tracked: if p.tracked {
                "yes".green().to_string()
            } else {
                "no".yellow().to_string()
            },
        })
        .collect();
    print_table(rows, "No running server processes found");
    let untracked = list.processes.iter().filter(|p| !p.tracked).count();
    if untracked > 0 {
        print_info(&format!(
            "{} process(es) not tracked yet; the supervisor adopts them on restart",
            untracked
        ));
    }
    Ok(())
}
