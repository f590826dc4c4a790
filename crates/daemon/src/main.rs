// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! dlock daemon (dlockd)
//!
//! Background process that owns the lock coordinator for one instance.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::sync::Arc;

use dlock_daemon::lifecycle::{self, Config, LifecycleError};
use dlock_daemon::{server, DEFAULT_INSTANCE};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_INSTANCE.to_string());
    let config = Config::for_instance(&name)?;

    // Before tracing, so the CLI can find where this attempt begins
    config.mark_startup(std::process::id())?;
    let log_guard = init_tracing(&config)?;
    info!(instance = %config.name, "starting dlockd");

    let mut daemon = match lifecycle::startup(&config) {
        Ok(daemon) => daemon,
        Err(e) => {
            // The non-blocking writer may not flush before exit
            config.record_startup_failure(&e);
            error!("Failed to start daemon: {}", e);
            drop(log_guard);
            return Err(e.into());
        }
    };

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let listener = daemon.take_listener().ok_or(LifecycleError::NotListening)?;
    let context = Arc::clone(&daemon.context);

    info!(socket = %config.socket_path.display(), "Daemon ready");
    println!("READY");

    tokio::select! {
        _ = server::serve(listener, context) => info!("shutdown requested by a client"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }

    daemon.shutdown()?;
    info!("Daemon stopped");
    drop(log_guard);
    Ok(())
}

/// Route tracing to the instance log, filtered by `RUST_LOG` (default info)
fn init_tracing(config: &Config) -> Result<WorkerGuard, LifecycleError> {
    let (writer, guard) = config.log_writer()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Ok(guard)
}
