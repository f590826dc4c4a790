// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol between lock clients and dlockd
//!
//! Messages are JSON, framed with a 4-byte big-endian length prefix.
//! Connections are long-lived: the client sends [`RequestFrame`]s, each
//! answered by a [`ServerFrame::Reply`] carrying the same id, and the server
//! may interleave [`ServerFrame::Push`] notifications at any point.

use std::time::Duration;

use dlock_core::ResourceSnapshot;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version exchanged in the `Hello` handshake
pub const PROTOCOL_VERSION: &str = "1";

/// Default timeout for writing a frame
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames larger than this are rejected before allocation
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Client → server calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    Ping,

    Hello {
        version: String,
    },

    /// Reserve a slot for `resource`; the grant arrives as a push
    AcquireLock {
        resource: String,
        lease_ms: u64,
        wait_timeout_ms: u64,
        /// Client-chosen token, letting the client subscribe before the call
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    ReleaseLock {
        token: String,
    },

    /// Route grant pushes for `token` to this connection
    Subscribe {
        token: String,
    },

    Unsubscribe {
        token: String,
    },

    Query {
        query: Query,
    },

    Status,

    Shutdown,
}

/// Read-only inspection of coordinator state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Query {
    ListResources,
    GetResource { resource: String },
}

/// Server replies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Ok,

    Pong,

    Hello {
        version: String,
    },

    /// The request is either granted or queued; only the push confirms a grant
    LockReserved {
        token: String,
        granted: bool,
    },

    Resources {
        resources: Vec<ResourceSnapshot>,
    },

    Resource {
        resource: Option<ResourceSnapshot>,
    },

    Status {
        uptime_secs: u64,
        resources_held: usize,
        requests_waiting: usize,
        connections: usize,
    },

    ShuttingDown,

    Error {
        message: String,
    },
}

/// Unsolicited server → client messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Push {
    NotifyLockAcquired { resource: String, token: String },
}

/// A request tagged with a correlation id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub request: Request,
}

/// Everything the server writes to a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame", content = "body", rename_all = "snake_case")]
pub enum ServerFrame {
    Reply { id: u64, response: Response },
    Push(Push),
}

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout")]
    Timeout,
}

/// Serialize a message to JSON (no length prefix)
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(message)?)
}

/// Deserialize a message from JSON
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Write `data` with its length prefix
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let len = u32::try_from(data.len()).map_err(|_| ProtocolError::MessageTooLarge {
        size: data.len(),
        max: MAX_MESSAGE_SIZE,
    })?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed message
///
/// EOF before the prefix means the peer hung up cleanly.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer).await?;
    Ok(buffer)
}

/// Read and decode one frame
pub async fn read_frame<T: DeserializeOwned, R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<T, ProtocolError> {
    let bytes = read_message(reader).await?;
    decode(&bytes)
}

/// Encode and write one frame, giving up after `timeout`
pub async fn write_frame<T: Serialize, W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &T,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    let data = encode(frame)?;
    tokio::time::timeout(timeout, write_message(writer, &data))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
