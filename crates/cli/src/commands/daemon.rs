// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon management commands

use anyhow::Result;
use clap::{Args, Subcommand};
use dlock_client::Timeouts;

use crate::client::Instance;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct DaemonArgs {
    #[command(subcommand)]
    pub command: DaemonCommand,
}

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon in the background
    Start,
    /// Stop the daemon
    Stop,
    /// Show daemon status
    Status,
}

pub async fn handle(
    args: DaemonArgs,
    instance: &Instance,
    timeouts: Timeouts,
    format: OutputFormat,
) -> Result<()> {
    match args.command {
        DaemonCommand::Start => {
            if instance.ensure_running(timeouts).await? {
                println!("Daemon started ({})", instance.name());
            } else {
                println!("Daemon already running ({})", instance.name());
            }
        }
        DaemonCommand::Stop => {
            if instance.stop(timeouts).await? {
                println!("Daemon stopped");
            } else {
                println!("Daemon not running");
            }
        }
        DaemonCommand::Status => status(instance, timeouts, format).await?,
    }
    Ok(())
}

async fn status(instance: &Instance, timeouts: Timeouts, format: OutputFormat) -> Result<()> {
    if !instance.is_running() {
        match format {
            OutputFormat::Text => println!("Daemon not running"),
            OutputFormat::Json => output::print_json(&serde_json::json!({
                "instance": instance.name(),
                "running": false,
            }))?,
        }
        return Ok(());
    }

    let status = instance.hub(timeouts).status().await?;
    let pid = instance.read_pid();
    let version = instance.read_version();

    match format {
        OutputFormat::Text => {
            println!("Daemon running ({})", instance.name());
            if let Some(pid) = pid {
                println!("  PID: {}", pid);
            }
            if let Some(version) = &version {
                println!("  Version: {}", version);
            }
            println!("  Socket: {}", instance.socket_path().display());
            println!("  Uptime: {}", output::format_uptime(status.uptime_secs));
            println!("  Locks held: {}", status.resources_held);
            println!("  Requests waiting: {}", status.requests_waiting);
            println!("  Connections: {}", status.connections);
        }
        OutputFormat::Json => output::print_json(&serde_json::json!({
            "instance": instance.name(),
            "running": true,
            "pid": pid,
            "version": version,
            "socket": instance.socket_path(),
            "uptime_secs": status.uptime_secs,
            "resources_held": status.resources_held,
            "requests_waiting": status.requests_waiting,
            "connections": status.connections,
        }))?,
    }
    Ok(())
}
