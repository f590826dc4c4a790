// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Errors surfaced to lock client callers

use std::time::Duration;

use thiserror::Error;

/// Failures of [`LockClient`](crate::LockClient) operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockClientError {
    /// No grant arrived before the caller's wait timeout
    ///
    /// The reservation is not cancelled on the server; it lapses when its
    /// own wait deadline passes.
    #[error("timed out after {waited:?} waiting for lock on {resource}")]
    Timeout { resource: String, waited: Duration },

    /// The lock service could not be reached
    #[error("lock service unavailable: {0}")]
    Unavailable(String),

    /// The lock service refused the request
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("unexpected response from lock service")]
    UnexpectedResponse,
}

impl LockClientError {
    pub fn unavailable(reason: impl std::fmt::Display) -> Self {
        LockClientError::Unavailable(reason.to_string())
    }
}

/// Failures loading client configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: {value:?}")]
    Env { var: String, value: String },

    #[error("quorum backend needs at least one endpoint")]
    NoEndpoints,
}
