//! Host and per-server telemetry commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, ServerTelemetry};
use crate::output::{
    color_health, color_status, color_usage, format_bytes, format_percent, format_rate,
    format_uptime, print_json, print_table, print_warning, OutputFormat,
};

/// Row for the servers table
#[derive(Tabled)]
struct ServerRow {
    #[tabled(rename = "Server")]
    server: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "RSS")]
    rss: String,
    #[tabled(rename = "Disk")]
    disk: String,
    #[tabled(rename = "Volume")]
    volume: String,
}

fn server_row(server: &ServerTelemetry) -> ServerRow {
    let status = if server.running { "running" } else { "stopped" };
    let dash = || "-".to_string();
    match &server.usage {
        Some(usage) => ServerRow {
            server: format!("Server{}", server.server_id),
            status: color_status(status),
            pid: server.pid.map(|p| p.to_string()).unwrap_or_else(dash),
            cpu: format_percent(usage.cpu_percent),
            memory: color_usage(usage.memory_percent),
            rss: format_bytes(usage.memory_rss_bytes),
            disk: color_usage(usage.disk_percent),
            volume: usage.volume_mount_point.clone(),
        },
        None => ServerRow {
            server: format!("Server{}", server.server_id),
            status: color_status(status),
            pid: server.pid.map(|p| p.to_string()).unwrap_or_else(dash),
            cpu: dash(),
            memory: dash(),
            rss: dash(),
            disk: dash(),
            volume: dash(),
        },
    }
}

/// Show the latest host sample
pub async fn show_host(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let host = client.host_telemetry().await?;

    if format == OutputFormat::Json {
        return print_json(&host);
    }

    println!("{}", "Host Telemetry".bold());
    println!("{}", "=".repeat(50));
    println!("Health:        {}", color_health(host.health_percent));

    let Some(sample) = host.sample else {
        print_warning("No host sample yet; the sampler has not completed a tick");
        return Ok(());
    };

    println!(
        "Sampled:       {}",
        sample.sampled_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("Uptime:        {}", format_uptime(sample.uptime_seconds));
    println!("Processes:     {}", sample.process_count);
    println!(
        "Load:          {:.2} {:.2} {:.2}",
        sample.load1, sample.load5, sample.load15
    );
    println!();
    println!("{}", "Resources".bold());
    println!("{}", "-".repeat(50));
    println!("CPU:           {}", color_usage(sample.cpu_percent));
    println!(
        "Memory:        {} ({} / {})",
        color_usage(sample.memory_percent),
        format_bytes(sample.memory_used_bytes),
        format_bytes(sample.memory_total_bytes)
    );
    println!(
        "Disk:          {} ({} / {})",
        color_usage(sample.disk_percent),
        format_bytes(sample.disk_used_bytes),
        format_bytes(sample.disk_total_bytes)
    );
    println!(
        "Network:       in {}  out {} ({} interfaces)",
        format_rate(sample.network_in_bps),
        format_rate(sample.network_out_bps),
        sample.network_interfaces
    );

    Ok(())
}

/// Show resource usage for every registered server
pub async fn show_servers(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let servers = client.server_telemetry().await?;

    if format == OutputFormat::Json {
        return print_json(&servers);
    }

    let running = servers.iter().filter(|s| s.running).count();
    print_table(
        servers.iter().map(server_row).collect(),
        "No servers registered with the supervisor",
    );
    if !servers.is_empty() {
        println!("\n{} of {} servers running", running, servers.len());
    }
    Ok(())
}
