// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! dlock - distributed lock CLI

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{daemon, lock};
use dlock_client::{Backend, ClientConfig};

use crate::client::{ClientError, Instance};
use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "dlock", version, about = "dlock - distributed locks over a local daemon")]
struct Cli {
    /// Client config file (defaults to $DLOCK_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Daemon instance to use instead of the configured socket
    #[arg(long, global = true)]
    instance: Option<String>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Daemon management
    Daemon(daemon::DaemonArgs),
    /// Acquire a lock and print its token
    Acquire(lock::AcquireArgs),
    /// Release a lock by token
    Release(lock::ReleaseArgs),
    /// List resources that are held or waited on
    Locks,
    /// Show one resource
    Show(lock::ShowArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = ClientConfig::load(cli.config.as_deref())?;
    let instance = match &cli.instance {
        Some(name) => {
            let instance = Instance::named(name)?;
            config.socket = instance.socket_path().to_path_buf();
            instance
        }
        None => Instance::for_socket(&config.socket)?,
    };

    match cli.command {
        Commands::Daemon(args) => {
            daemon::handle(args, &instance, config.timeouts, cli.output).await?;
        }
        Commands::Acquire(args) => {
            ensure_hub_daemon(&config, &instance).await?;
            let client = dlock_client::from_config(&config)?;
            lock::acquire(args, client.as_ref(), cli.output).await?;
        }
        Commands::Release(args) => {
            ensure_hub_daemon(&config, &instance).await?;
            let client = dlock_client::from_config(&config)?;
            lock::release(args, client.as_ref()).await?;
        }
        Commands::Locks => {
            require_running(&instance)?;
            lock::locks(&instance.hub(config.timeouts), cli.output).await?;
        }
        Commands::Show(args) => {
            require_running(&instance)?;
            lock::show(args, &instance.hub(config.timeouts), cli.output).await?;
        }
    }

    Ok(())
}

/// The hub backend starts its daemon on demand; quorum endpoints are
/// managed separately
async fn ensure_hub_daemon(config: &ClientConfig, instance: &Instance) -> Result<()> {
    if config.backend == Backend::Hub && instance.ensure_running(config.timeouts).await? {
        tracing::info!(instance = instance.name(), "started daemon");
    }
    Ok(())
}

fn require_running(instance: &Instance) -> Result<(), ClientError> {
    if instance.is_running() {
        Ok(())
    } else {
        Err(ClientError::DaemonNotRunning)
    }
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
