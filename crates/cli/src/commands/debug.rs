//! Debug and troubleshooting CLI commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, print_json, print_table, print_warning, OutputFormat};

/// Row for the component health table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn status_label(status: supervisor_lib::ComponentStatus) -> &'static str {
    match status {
        supervisor_lib::ComponentStatus::Healthy => "healthy",
        supervisor_lib::ComponentStatus::Degraded => "degraded",
        supervisor_lib::ComponentStatus::Unhealthy => "unhealthy",
    }
}

/// Show the health of each supervisor component
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let result = client.get_health().await;

    let health = match result {
        Ok(health) => health,
        Err(e) => {
            print_warning("Could not reach the supervisor daemon");
            return Err(e);
        }
    };

    if format == OutputFormat::Json {
        return print_json(&health);
    }

    println!("{}", "Supervisor Health".bold());
    println!("{}", "=".repeat(50));
    println!("Overall: {}", color_status(status_label(health.status)));
    println!();

    let rows = health
        .components
        .iter()
        .map(|(name, component)| ComponentRow {
            component: name.to_string(),
            status: color_status(status_label(component.status)),
            message: component.message.clone().unwrap_or_default(),
        })
        .collect();
    print_table(rows, "No components registered");
    Ok(())
}
