// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client configuration
//!
//! Read from a TOML file (`--config`, else `$DLOCK_CONFIG`, else built-in
//! defaults), then adjusted by environment overrides.
//!
//! ```toml
//! socket = "/tmp/dlock/default.sock"
//! backend = "quorum"
//!
//! [quorum]
//! endpoints = ["/tmp/dlock/a.sock", "/tmp/dlock/b.sock", "/tmp/dlock/c.sock"]
//!
//! [timeouts]
//! ipc = "5s"
//! connect = "2s"
//!
//! [reconnect]
//! attempts = 5
//! backoff = "200ms"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "DLOCK_CONFIG";

/// Which lock backend the client talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// A single dlockd over its Unix socket
    #[default]
    Hub,
    /// Majority agreement across several independent dlockd instances
    Quorum,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Socket of the dlockd instance used by the hub backend
    pub socket: PathBuf,
    pub backend: Backend,
    pub quorum: QuorumConfig,
    pub timeouts: Timeouts,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket: dlock_daemon::lifecycle::socket_dir()
                .join(format!("{}.sock", dlock_daemon::DEFAULT_INSTANCE)),
            backend: Backend::default(),
            quorum: QuorumConfig::default(),
            timeouts: Timeouts::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuorumConfig {
    /// Sockets of the participating dlockd instances
    pub endpoints: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    /// Bound on each request/reply round trip
    #[serde(with = "humantime_serde")]
    pub ipc: Duration,
    /// Bound on each connection attempt
    #[serde(with = "humantime_serde")]
    pub connect: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            ipc: Duration::from_secs(5),
            connect: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectPolicy {
    /// Connection attempts before giving up, including the first
    pub attempts: u32,
    /// Delay after the first failed attempt; grows linearly
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(200),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt + 1`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt.max(1))
    }
}

impl ClientConfig {
    /// Load from `path`, else `$DLOCK_CONFIG`, else defaults, then apply
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `DLOCK_SOCKET`, `DLOCK_TIMEOUT_IPC_MS` and
    /// `DLOCK_TIMEOUT_CONNECT_MS` as returned by `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(socket) = lookup("DLOCK_SOCKET") {
            self.socket = PathBuf::from(socket);
        }
        if let Some(ipc) = parse_duration_ms(&lookup, "DLOCK_TIMEOUT_IPC_MS")? {
            self.timeouts.ipc = ipc;
        }
        if let Some(connect) = parse_duration_ms(&lookup, "DLOCK_TIMEOUT_CONNECT_MS")? {
            self.timeouts.connect = connect;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == Backend::Quorum && self.quorum.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        Ok(())
    }
}

fn parse_duration_ms<F>(lookup: &F, var: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<u64>()
        .map(|ms| Some(Duration::from_millis(ms)))
        .map_err(|_| ConfigError::Env {
            var: var.to_string(),
            value,
        })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
