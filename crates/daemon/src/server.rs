// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket server and connection handling.
//!
//! Each accepted connection gets a reader loop and a writer task. Replies and
//! grant pushes share the writer's queue, so a push can never interleave with
//! a half-written reply.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dlock_core::{AcquireParams, Clock, LockCoordinator, SystemClock, TokenGen, UuidTokens};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info};

use crate::gateway::{ConnectionId, FrameReceiver, NotificationGateway};
use crate::protocol::{
    self, ProtocolError, Query, Request, RequestFrame, Response, ServerFrame, DEFAULT_TIMEOUT,
    PROTOCOL_VERSION,
};

/// Coordinator wired to the notification gateway
pub type DaemonCoordinator<C = SystemClock, T = UuidTokens> =
    LockCoordinator<NotificationGateway, C, T>;

/// State shared by every connection task
pub struct ServerContext<C = SystemClock, T = UuidTokens> {
    coordinator: DaemonCoordinator<C, T>,
    tokens: T,
    start_time: Instant,
    next_connection: AtomicU64,
    shutdown: Notify,
}

impl ServerContext {
    pub fn new() -> Self {
        Self::with_parts(SystemClock, UuidTokens)
    }
}

impl Default for ServerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock, T: TokenGen> ServerContext<C, T> {
    pub fn with_parts(clock: C, tokens: T) -> Self {
        Self {
            coordinator: LockCoordinator::new(NotificationGateway::new(), clock, tokens.clone()),
            tokens,
            start_time: Instant::now(),
            next_connection: AtomicU64::new(1),
            shutdown: Notify::new(),
        }
    }

    pub fn coordinator(&self) -> &DaemonCoordinator<C, T> {
        &self.coordinator
    }

    pub fn gateway(&self) -> &NotificationGateway {
        self.coordinator.notifier()
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Ask [`serve`] to stop accepting connections
    pub fn request_shutdown(&self) {
        self.shutdown.notify_one();
    }

    async fn shutdown_requested(&self) {
        self.shutdown.notified().await;
    }

    fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }
}

/// Accept connections until shutdown is requested over IPC
pub async fn serve<C: Clock, T: TokenGen>(listener: UnixListener, ctx: Arc<ServerContext<C, T>>) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(ctx, stream).await {
                                error!("Error handling connection: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                    }
                }
            }

            _ = ctx.shutdown_requested() => {
                info!("Shutdown requested via IPC");
                break;
            }
        }
    }
}

/// Serve one client connection until it closes
pub async fn handle_connection<C: Clock, T: TokenGen>(
    ctx: Arc<ServerContext<C, T>>,
    stream: UnixStream,
) -> Result<(), ServerError> {
    let conn = ctx.next_connection_id();
    let (mut reader, writer) = stream.into_split();

    let (tx, rx) = mpsc::unbounded_channel();
    ctx.gateway().connect(conn, tx.clone());
    let writer_task = tokio::spawn(write_frames(conn, writer, rx));
    debug!(%conn, "client connected");

    let result = loop {
        let frame: RequestFrame = match protocol::read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(ProtocolError::ConnectionClosed) => break Ok(()),
            Err(e) => {
                error!(%conn, "Failed to read request: {}", e);
                break Err(ServerError::Protocol(e));
            }
        };

        debug!(%conn, id = frame.id, request = ?frame.request, "received request");
        let response = handle_request(&ctx, conn, frame.request).await;

        let reply = ServerFrame::Reply {
            id: frame.id,
            response,
        };
        if tx.send(reply).is_err() {
            debug!(%conn, "writer closed, dropping connection");
            break Ok(());
        }
    };

    let abandoned = ctx.gateway().disconnect(conn);
    drop(tx);
    if let Err(e) = writer_task.await {
        error!(%conn, "writer task failed: {}", e);
    }
    debug!(%conn, abandoned, "client disconnected");

    result
}

async fn write_frames(conn: ConnectionId, mut writer: OwnedWriteHalf, mut rx: FrameReceiver) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = protocol::write_frame(&mut writer, &frame, DEFAULT_TIMEOUT).await {
            error!(%conn, "Failed to write frame: {}", e);
            break;
        }
    }
}

/// Handle a single request and return a response
async fn handle_request<C: Clock, T: TokenGen>(
    ctx: &ServerContext<C, T>,
    conn: ConnectionId,
    request: Request,
) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::Hello { version: _ } => Response::Hello {
            version: PROTOCOL_VERSION.to_string(),
        },

        Request::AcquireLock {
            resource,
            lease_ms,
            wait_timeout_ms,
            token,
        } => {
            let token = token.unwrap_or_else(|| ctx.tokens.next_token());

            // Subscribe first so an immediate grant is routed back here
            let subscribed = ctx.gateway().subscribe(conn, &token);

            let params = AcquireParams::new(
                resource,
                Duration::from_millis(lease_ms),
                Duration::from_millis(wait_timeout_ms),
            )
            .with_token(token.clone())
            .with_requester(conn.to_string());

            match ctx.coordinator.acquire(params).await {
                Ok(outcome) => Response::LockReserved {
                    token: outcome.token().to_string(),
                    granted: outcome.is_granted(),
                },
                Err(e) => {
                    // A membership from an earlier request for this token stays
                    if subscribed {
                        ctx.gateway().unsubscribe(conn, &token);
                    }
                    debug!(%conn, token, "acquire rejected: {}", e);
                    Response::Error {
                        message: e.to_string(),
                    }
                }
            }
        }

        Request::ReleaseLock { token } => match ctx.coordinator.release(&token).await {
            Ok(_) => Response::Ok,
            Err(e) => {
                error!(%conn, token, "release failed: {}", e);
                Response::Error {
                    message: e.to_string(),
                }
            }
        },

        Request::Subscribe { token } => {
            ctx.gateway().subscribe(conn, &token);
            Response::Ok
        }

        Request::Unsubscribe { token } => {
            ctx.gateway().unsubscribe(conn, &token);
            Response::Ok
        }

        Request::Query { query } => handle_query(ctx, query),

        Request::Status => {
            let stats = ctx.coordinator.stats();
            Response::Status {
                uptime_secs: ctx.uptime().as_secs(),
                resources_held: stats.resources_held,
                requests_waiting: stats.requests_waiting,
                connections: ctx.gateway().connection_count(),
            }
        }

        Request::Shutdown => {
            ctx.request_shutdown();
            Response::ShuttingDown
        }
    }
}

/// Handle query requests
fn handle_query<C: Clock, T: TokenGen>(ctx: &ServerContext<C, T>, query: Query) -> Response {
    match query {
        Query::ListResources => Response::Resources {
            resources: ctx.coordinator.snapshots(),
        },

        Query::GetResource { resource } => Response::Resource {
            resource: ctx.coordinator.snapshot(&resource),
        },
    }
}

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
