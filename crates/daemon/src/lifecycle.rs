// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup and shutdown.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use fs2::FileExt;
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

use crate::server::ServerContext;
use crate::STARTUP_MARKER_PREFIX;

/// Instance name used when none is given
pub const DEFAULT_INSTANCE: &str = "default";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Instance name; one daemon per name
    pub name: String,
    /// Path to Unix socket
    pub socket_path: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to version file
    pub version_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
}

impl Config {
    /// Resolve paths for a named instance from the environment
    pub fn for_instance(name: &str) -> Result<Self, LifecycleError> {
        Self::with_dirs(name, state_dir()?, socket_dir())
    }

    /// Resolve paths under explicit state and socket directories
    pub fn with_dirs(
        name: &str,
        state_root: PathBuf,
        socket_dir: PathBuf,
    ) -> Result<Self, LifecycleError> {
        if !is_valid_instance_name(name) {
            return Err(LifecycleError::InvalidName(name.to_string()));
        }

        let state_dir = state_root.join(name);
        Ok(Self {
            name: name.to_string(),
            socket_path: socket_dir.join(format!("{}.sock", name)),
            lock_path: state_dir.join("daemon.pid"),
            version_path: state_dir.join("daemon.version"),
            log_path: state_dir.join("daemon.log"),
        })
    }

    fn append_log(&self) -> Result<File, LifecycleError> {
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?)
    }

    /// Mark the start of a launch attempt in the log
    ///
    /// The CLI only reports errors logged after the last marker.
    pub fn mark_startup(&self, pid: u32) -> Result<(), LifecycleError> {
        let mut log = self.append_log()?;
        writeln!(log, "{}{})", STARTUP_MARKER_PREFIX, pid)?;
        Ok(())
    }

    /// Append a failed launch straight to the log, bypassing tracing
    pub fn record_startup_failure(&self, error: &LifecycleError) {
        if let Ok(mut log) = self.append_log() {
            let _ = writeln!(log, "ERROR Failed to start daemon: {}", error);
        }
    }

    /// Background writer onto the instance log; keep the guard until exit
    pub fn log_writer(&self) -> Result<(NonBlocking, WorkerGuard), LifecycleError> {
        Ok(tracing_appender::non_blocking(self.append_log()?))
    }
}

fn is_valid_instance_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && name != "."
        && name != ".."
}

/// Daemon state during operation
pub struct DaemonState {
    /// Configuration
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    /// Unix socket listener, taken by the accept loop
    pub listener: Option<UnixListener>,
    /// Shared with every connection task
    pub context: Arc<ServerContext>,
}

impl DaemonState {
    /// Hand the listener to the accept loop
    pub fn take_listener(&mut self) -> Option<UnixListener> {
        self.listener.take()
    }

    /// Shutdown the daemon gracefully
    pub fn shutdown(&mut self) -> Result<(), LifecycleError> {
        info!("Shutting down daemon...");

        let stats = self.context.coordinator().stats();
        if stats.resources_held > 0 || stats.requests_waiting > 0 {
            warn!(
                resources_held = stats.resources_held,
                requests_waiting = stats.requests_waiting,
                "Discarding in-memory lock state"
            );
        }

        // 1. Stop accepting connections
        self.listener = None;

        // 2. Remove socket file
        if self.config.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
                warn!("Failed to remove socket file: {}", e);
            }
        }

        // 3. Remove PID file
        if self.config.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.lock_path) {
                warn!("Failed to remove PID file: {}", e);
            }
        }

        // 4. Remove version file
        if self.config.version_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.version_path) {
                warn!("Failed to remove version file: {}", e);
            }
        }

        // 5. Lock file is released automatically when self.lock_file is dropped

        info!("Daemon shutdown complete");
        Ok(())
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Invalid instance name: {0:?}")]
    InvalidName(String),

    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("Daemon is not listening")]
    NotListening,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the daemon
pub fn startup(config: &Config) -> Result<DaemonState, LifecycleError> {
    match startup_inner(config) {
        Ok(state) => Ok(state),
        Err(e) => {
            // Clean up any resources created before failure, unless another
            // daemon owns them
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(e)
        }
    }
}

/// Inner startup logic - cleanup_on_failure called if this fails
fn startup_inner(config: &Config) -> Result<DaemonState, LifecycleError> {
    // 1. Create state and socket directories
    if let Some(parent) = config.lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // 2. Acquire lock file FIRST - prevents races
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;

    // Write PID to lock file
    use std::io::Write;
    lock_file.set_len(0)?;
    let mut lock_file = lock_file;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    // 3. Write version file
    std::fs::write(&config.version_path, env!("CARGO_PKG_VERSION"))?;

    // 4. Remove stale socket and bind (LAST - only after all validation passes)
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = UnixListener::bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;

    info!("Daemon started for instance: {}", config.name);

    Ok(DaemonState {
        config: config.clone(),
        lock_file,
        listener: Some(listener),
        context: Arc::new(ServerContext::new()),
    })
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &Config) {
    // Remove socket if we created it
    if config.socket_path.exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }

    // Remove version file
    if config.version_path.exists() {
        let _ = std::fs::remove_file(&config.version_path);
    }

    // Remove PID/lock file
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}

/// Get the state directory for dlock
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    // Use XDG_STATE_HOME or default to ~/.local/state
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("dlock"));
    }

    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/dlock"))
}

/// Get the socket directory for dlock
///
/// Uses /tmp/dlock by default to keep paths short (macOS SUN_LEN = 104).
/// Can be overridden with DLOCK_SOCKET_DIR for testing.
pub fn socket_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DLOCK_SOCKET_DIR") {
        return PathBuf::from(dir);
    }
    PathBuf::from("/tmp/dlock")
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
