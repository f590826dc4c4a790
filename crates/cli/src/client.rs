// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon process management for CLI commands

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use dlock_client::{HubLockClient, ReconnectPolicy, Timeouts};
use dlock_daemon::lifecycle::{self, Config, LifecycleError};
use dlock_daemon::STARTUP_MARKER_PREFIX;
use thiserror::Error;

// Timeout configuration (env vars in milliseconds)
fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Timeout for waiting for process to exit
pub fn timeout_exit() -> Duration {
    parse_duration_ms("DLOCK_TIMEOUT_EXIT_MS").unwrap_or(Duration::from_secs(2))
}

/// Polling interval for retries
pub fn poll_interval() -> Duration {
    parse_duration_ms("DLOCK_POLL_INTERVAL_MS").unwrap_or(Duration::from_millis(50))
}

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Failed to start daemon: {0}")]
    DaemonStartFailed(String),

    #[error("Connection timeout waiting for daemon to start")]
    DaemonStartTimeout,

    #[error("Socket path has no instance name: {0}")]
    BadSocketPath(PathBuf),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The files of one named dlockd instance
#[derive(Debug, Clone)]
pub struct Instance {
    config: Config,
}

impl Instance {
    /// Instance `name` under the default state and socket directories
    pub fn named(name: &str) -> Result<Self, ClientError> {
        Ok(Self {
            config: Config::for_instance(name)?,
        })
    }

    /// Instance whose socket is `socket`, named after the socket file
    pub fn for_socket(socket: &Path) -> Result<Self, ClientError> {
        let name = socket
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| ClientError::BadSocketPath(socket.to_path_buf()))?;
        let socket_dir = socket
            .parent()
            .ok_or_else(|| ClientError::BadSocketPath(socket.to_path_buf()))?;
        Self::with_dirs(name, lifecycle::state_dir()?, socket_dir.to_path_buf())
    }

    pub fn with_dirs(
        name: &str,
        state_root: PathBuf,
        socket_dir: PathBuf,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            config: Config::with_dirs(name, state_root, socket_dir)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    pub fn log_path(&self) -> &Path {
        &self.config.log_path
    }

    /// A socket file is present; the daemon may still be starting
    pub fn is_running(&self) -> bool {
        self.config.socket_path.exists()
    }

    /// Hub client for this instance that gives up after one attempt
    pub fn hub(&self, timeouts: Timeouts) -> HubLockClient {
        HubLockClient::new(
            self.config.socket_path.clone(),
            timeouts,
            ReconnectPolicy {
                attempts: 1,
                backoff: poll_interval(),
            },
        )
    }

    /// Start the daemon unless it is already running
    ///
    /// Returns true when a new daemon was started. A daemon from another
    /// version is stopped and replaced.
    pub async fn ensure_running(&self, timeouts: Timeouts) -> Result<bool, ClientError> {
        if let Some(daemon_version) = self.read_version() {
            if daemon_version != env!("CARGO_PKG_VERSION") {
                tracing::info!(
                    daemon_version,
                    "daemon version differs from CLI, restarting it"
                );
                self.stop(timeouts).await?;
            }
        }

        if self.is_running() {
            return Ok(false);
        }

        let child = self.start_background()?;
        self.wait_for_socket(timeouts.connect, child).await?;
        Ok(true)
    }

    /// Start the daemon in the background, returning the child process handle
    fn start_background(&self) -> Result<std::process::Child, ClientError> {
        let dlockd = find_daemon_binary();
        let socket_dir = self
            .config
            .socket_path
            .parent()
            .ok_or_else(|| ClientError::BadSocketPath(self.config.socket_path.clone()))?;

        Command::new(&dlockd)
            .arg(&self.config.name)
            .env("DLOCK_SOCKET_DIR", socket_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| ClientError::DaemonStartFailed(format!("{}: {}", dlockd.display(), e)))
    }

    async fn wait_for_socket(
        &self,
        timeout: Duration,
        mut child: std::process::Child,
    ) -> Result<(), ClientError> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            // Check if daemon process exited early (startup failure)
            if let Ok(Some(status)) = child.try_wait() {
                // Poll for startup error in log (filesystem may need to sync)
                let poll_start = Instant::now();
                while poll_start.elapsed() < timeout_exit() {
                    if let Some(err) = self.read_startup_error() {
                        return Err(ClientError::DaemonStartFailed(err));
                    }
                    tokio::time::sleep(poll_interval()).await;
                }
                return Err(ClientError::DaemonStartFailed(format!(
                    "exited with {}",
                    status
                )));
            }

            if self.is_running() {
                return Ok(());
            }
            tokio::time::sleep(poll_interval()).await;
        }

        Err(self.wrap_with_startup_error(ClientError::DaemonStartTimeout))
    }

    /// Stop the daemon (graceful first, then forceful)
    /// Returns true if daemon was stopped, false if it wasn't running
    pub async fn stop(&self, timeouts: Timeouts) -> Result<bool, ClientError> {
        if !self.is_running() {
            self.cleanup_stale_pid();
            return Ok(false);
        }

        let shutdown_result = self.hub(timeouts).shutdown().await;
        if let Err(e) = &shutdown_result {
            tracing::warn!(error = %e, "graceful shutdown failed");
        }

        if let Some(pid) = self.read_pid() {
            if shutdown_result.is_ok() {
                wait_for_exit(pid, timeout_exit()).await;
            }

            // Force kill if still running
            if process_exists(pid) {
                force_kill_daemon(pid);
                wait_for_exit(pid, timeout_exit()).await;
            }
        }

        // A killed daemon leaves its socket behind
        if self.config.socket_path.exists() {
            let _ = std::fs::remove_file(&self.config.socket_path);
        }
        self.cleanup_stale_pid();
        Ok(true)
    }

    /// PID recorded by the running daemon
    pub fn read_pid(&self) -> Option<u32> {
        std::fs::read_to_string(&self.config.lock_path)
            .ok()
            .and_then(|content| content.trim().parse::<u32>().ok())
    }

    /// Version recorded by the running daemon
    pub fn read_version(&self) -> Option<String> {
        std::fs::read_to_string(&self.config.version_path)
            .ok()
            .map(|version| version.trim().to_string())
    }

    fn cleanup_stale_pid(&self) {
        if self.config.lock_path.exists() {
            let _ = std::fs::remove_file(&self.config.lock_path);
        }
    }

    /// Read daemon log from the last startup marker, looking for errors.
    pub fn read_startup_error(&self) -> Option<String> {
        let content = std::fs::read_to_string(&self.config.log_path).ok()?;
        startup_error_in(&content)
    }

    /// Replace `err` with the daemon's startup error when the log has one
    fn wrap_with_startup_error(&self, err: ClientError) -> ClientError {
        match self.read_startup_error() {
            Some(startup_error) => ClientError::DaemonStartFailed(startup_error),
            None => err,
        }
    }
}

/// Errors logged since the last startup marker in `log`
pub fn startup_error_in(log: &str) -> Option<String> {
    let start_pos = log.rfind(STARTUP_MARKER_PREFIX)?;
    let startup_log = &log[start_pos..];

    let errors: Vec<&str> = startup_log
        .lines()
        .filter(|line| line.contains(" ERROR ") || line.contains("Failed to start"))
        .collect();

    if errors.is_empty() {
        return None;
    }

    // Format: "timestamp LEVEL target: message"; keep the message
    let messages: Vec<&str> = errors
        .iter()
        .filter_map(|line| line.split_once(": ").map(|(_, msg)| msg))
        .collect();

    if messages.is_empty() {
        Some(errors.join("\n"))
    } else {
        Some(messages.join("\n"))
    }
}

/// Wait for a process to exit
async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if !process_exists(pid) {
            return true;
        }
        tokio::time::sleep(poll_interval()).await;
    }
    false
}

/// Find the dlockd binary
fn find_daemon_binary() -> PathBuf {
    // Explicit override (used by tests to ensure correct binary)
    if let Ok(path) = std::env::var("DLOCK_DAEMON_BINARY") {
        return PathBuf::from(path);
    }

    // Check current executable's directory
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("dlockd");
            if sibling.exists() {
                return sibling;
            }
        }
    }

    // Fall back to PATH lookup
    PathBuf::from("dlockd")
}

/// Check if a process with the given PID exists
pub fn process_exists(pid: u32) -> bool {
    // kill -0 checks for the process without sending a signal
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Force kill a daemon process
pub fn force_kill_daemon(pid: u32) -> bool {
    Command::new("kill")
        .args(["-9", &pid.to_string()])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
