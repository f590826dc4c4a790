// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! dlock-daemon: the lock service behind a Unix socket
//!
//! Exposes the wire protocol shared with clients, the notification gateway
//! that routes grant pushes by token, the connection server, and the daemon
//! lifecycle used by `dlockd`.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod gateway;
pub mod lifecycle;
pub mod protocol;
pub mod server;

pub use gateway::{ConnectionId, NotificationGateway};
pub use lifecycle::{Config, DaemonState, LifecycleError, DEFAULT_INSTANCE};
pub use protocol::{
    ProtocolError, Push, Query, Request, RequestFrame, Response, ServerFrame, PROTOCOL_VERSION,
};
pub use server::{handle_connection, serve, DaemonCoordinator, ServerContext, ServerError};

/// Startup marker prefix written to log before anything else.
/// The CLI uses this to find where the current startup attempt begins.
/// Full format: "--- dlockd: starting (pid: 12345)"
pub const STARTUP_MARKER_PREFIX: &str = "--- dlockd: starting (pid: ";
