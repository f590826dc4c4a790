// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dlock-client: lock client bridges for dlockd
//!
//! - [`HubLockClient`] talks to one daemon over a persistent Unix socket
//! - [`QuorumLockClient`] holds a lock only when a majority of daemons grant it
//! - [`TracedLockClient`] wraps either with spans and timings

pub mod config;
pub mod error;
pub mod hub;
pub mod quorum;
pub mod traced;
pub mod traits;

mod backend;
mod waiters;

#[cfg(any(test, feature = "test-support"))]
mod fake;

pub use backend::from_config;
pub use config::{Backend, ClientConfig, QuorumConfig, ReconnectPolicy, Timeouts, CONFIG_ENV};
pub use error::{ConfigError, LockClientError};
pub use hub::{DaemonStatus, HubLockClient};
pub use quorum::QuorumLockClient;
pub use traced::TracedLockClient;
pub use traits::LockClient;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeLockClient, LockCall};
