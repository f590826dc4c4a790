// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend selection

use crate::config::{Backend, ClientConfig};
use crate::error::ConfigError;
use crate::hub::HubLockClient;
use crate::quorum::QuorumLockClient;
use crate::traced::TracedLockClient;
use crate::traits::LockClient;

/// Build the lock client `config` selects, with tracing
pub fn from_config(config: &ClientConfig) -> Result<Box<dyn LockClient>, ConfigError> {
    config.validate()?;
    let client: Box<dyn LockClient> = match config.backend {
        Backend::Hub => Box::new(TracedLockClient::new(HubLockClient::from_config(config))),
        Backend::Quorum => Box::new(TracedLockClient::new(QuorumLockClient::from_config(
            config,
        ))),
    };
    tracing::debug!(backend = client.identity(), "lock client ready");
    Ok(client)
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
