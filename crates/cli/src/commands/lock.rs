// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock commands

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use dlock_client::{HubLockClient, LockClient};

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct AcquireArgs {
    /// Resource to lock
    pub resource: String,

    /// Lease length once granted (milliseconds)
    #[arg(long, default_value = "30000")]
    pub lease_ms: u64,

    /// How long to wait for the lock (milliseconds)
    #[arg(long, default_value = "10000")]
    pub wait_ms: u64,

    /// Hold the lock this long, then release it (milliseconds)
    #[arg(long)]
    pub hold_ms: Option<u64>,

    /// Use this token instead of a generated one
    #[arg(long)]
    pub token: Option<String>,
}

#[derive(Args)]
pub struct ReleaseArgs {
    /// Token returned by acquire
    pub token: String,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Resource to inspect
    pub resource: String,
}

pub async fn acquire(args: AcquireArgs, client: &dyn LockClient, format: OutputFormat) -> Result<()> {
    let lease = Duration::from_millis(args.lease_ms);
    let wait = Duration::from_millis(args.wait_ms);

    let token = match args.token {
        Some(token) => {
            client
                .acquire_with_token(&args.resource, lease, wait, &token)
                .await?;
            token
        }
        None => client.acquire(&args.resource, lease, wait).await?,
    };

    match format {
        OutputFormat::Text => println!("{}", token),
        OutputFormat::Json => output::print_json(&serde_json::json!({
            "resource": args.resource,
            "token": token,
            "lease_ms": args.lease_ms,
        }))?,
    }

    let Some(hold_ms) = args.hold_ms else {
        return Ok(());
    };

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(hold_ms)) => {}
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted, releasing {}", token);
        }
    }
    client.release(&token).await?;
    eprintln!("Released {}", token);
    Ok(())
}

pub async fn release(args: ReleaseArgs, client: &dyn LockClient) -> Result<()> {
    client.release(&args.token).await?;
    println!("Released {}", args.token);
    Ok(())
}

pub async fn locks(hub: &HubLockClient, format: OutputFormat) -> Result<()> {
    let resources = hub.list_resources().await?;

    match format {
        OutputFormat::Json => output::print_json(&resources)?,
        OutputFormat::Text if resources.is_empty() => println!("No locks"),
        OutputFormat::Text => {
            println!("{}", output::resource_header());
            for snapshot in &resources {
                println!("{}", output::resource_row(snapshot));
            }
        }
    }
    Ok(())
}

pub async fn show(args: ShowArgs, hub: &HubLockClient, format: OutputFormat) -> Result<()> {
    let snapshot = hub.resource(&args.resource).await?;

    match (format, snapshot) {
        (OutputFormat::Json, snapshot) => output::print_json(&snapshot)?,
        (OutputFormat::Text, Some(snapshot)) => println!("{}", output::resource_detail(&snapshot)),
        (OutputFormat::Text, None) => println!("Resource {} is idle", args.resource),
    }
    Ok(())
}
