// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hub backend: a persistent connection to one dlockd
//!
//! Requests carry correlation ids and are answered out of a shared reply
//! table by a background reader, which also routes grant pushes to the
//! callers blocked in `acquire`. When the connection drops while callers are
//! still waiting, the client reconnects in the background, re-subscribes
//! their tokens, and checks whether a grant was made while it was away.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dlock_core::ResourceSnapshot;
use dlock_daemon::protocol::{self, ProtocolError};
use dlock_daemon::{Push, Query, Request, RequestFrame, Response, ServerFrame, PROTOCOL_VERSION};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ReconnectPolicy, Timeouts};
use crate::error::LockClientError;
use crate::traits::LockClient;
use crate::waiters::Waiters;

/// Daemon counters returned by [`HubLockClient::status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonStatus {
    pub uptime_secs: u64,
    pub resources_held: usize,
    pub requests_waiting: usize,
    pub connections: usize,
}

/// Lock client for a single dlockd; clones share the connection
#[derive(Clone)]
pub struct HubLockClient {
    inner: Arc<HubInner>,
}

struct HubInner {
    identity: String,
    socket_path: PathBuf,
    timeouts: Timeouts,
    reconnect: ReconnectPolicy,
    next_id: AtomicU64,
    waiters: Waiters,
    link: tokio::sync::Mutex<Option<Link>>,
}

/// One live connection
#[derive(Clone)]
struct Link {
    outbound: mpsc::UnboundedSender<RequestFrame>,
    replies: Replies,
    alive: Arc<AtomicBool>,
}

/// Callers waiting for a reply, keyed by request id
#[derive(Clone, Default)]
struct Replies {
    slots: Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>,
}

impl Replies {
    fn register(&self, id: u64) -> oneshot::Receiver<Response> {
        let (tx, rx) = oneshot::channel();
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        rx
    }

    fn complete(&self, id: u64, response: Response) {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        match slot {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!(id, "reply for abandoned request dropped"),
        }
    }

    fn cancel(&self, id: u64) {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    /// Fail every outstanding request
    fn close(&self) {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Link {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    async fn request(
        &self,
        id: u64,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, LockClientError> {
        let reply = self.replies.register(id);
        if !self.alive.load(Ordering::SeqCst) {
            self.replies.cancel(id);
            return Err(LockClientError::unavailable("connection closed"));
        }
        if self.outbound.send(RequestFrame { id, request }).is_err() {
            self.replies.cancel(id);
            return Err(LockClientError::unavailable("connection closed"));
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(LockClientError::unavailable(
                "connection lost before reply",
            )),
            Err(_) => {
                self.replies.cancel(id);
                Err(LockClientError::Unavailable(format!(
                    "no reply within {:?}",
                    timeout
                )))
            }
        }
    }
}

impl HubLockClient {
    /// Client for the daemon at `socket_path`; connects on first use
    pub fn new(
        socket_path: impl Into<PathBuf>,
        timeouts: Timeouts,
        reconnect: ReconnectPolicy,
    ) -> Self {
        let socket_path = socket_path.into();
        Self {
            inner: Arc::new(HubInner {
                identity: format!("dlock hub ({})", socket_path.display()),
                socket_path,
                timeouts,
                reconnect,
                next_id: AtomicU64::new(1),
                waiters: Waiters::default(),
                link: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.socket.clone(), config.timeouts, config.reconnect)
    }

    pub fn socket_path(&self) -> &Path {
        &self.inner.socket_path
    }

    /// Whether a live connection is currently held
    pub async fn is_connected(&self) -> bool {
        self.inner
            .link
            .lock()
            .await
            .as_ref()
            .is_some_and(Link::is_alive)
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send one request over the shared connection
    pub async fn call(&self, request: Request) -> Result<Response, LockClientError> {
        let link = self.link().await?;
        link.request(self.next_id(), request, self.inner.timeouts.ipc)
            .await
    }

    pub async fn ping(&self) -> Result<(), LockClientError> {
        match self.call(Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn status(&self) -> Result<DaemonStatus, LockClientError> {
        match self.call(Request::Status).await? {
            Response::Status {
                uptime_secs,
                resources_held,
                requests_waiting,
                connections,
            } => Ok(DaemonStatus {
                uptime_secs,
                resources_held,
                requests_waiting,
                connections,
            }),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceSnapshot>, LockClientError> {
        match self
            .call(Request::Query {
                query: Query::ListResources,
            })
            .await?
        {
            Response::Resources { resources } => Ok(resources),
            other => Err(unexpected(other)),
        }
    }

    pub async fn resource(
        &self,
        resource: &str,
    ) -> Result<Option<ResourceSnapshot>, LockClientError> {
        match self
            .call(Request::Query {
                query: Query::GetResource {
                    resource: resource.to_string(),
                },
            })
            .await?
        {
            Response::Resource { resource } => Ok(resource),
            other => Err(unexpected(other)),
        }
    }

    /// Ask the daemon to exit
    pub async fn shutdown(&self) -> Result<(), LockClientError> {
        match self.call(Request::Shutdown).await? {
            Response::Ok | Response::ShuttingDown => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Current connection, reconnecting if it has dropped
    async fn link(&self) -> Result<Link, LockClientError> {
        let mut current = self.inner.link.lock().await;
        if let Some(link) = current.as_ref().filter(|link| link.is_alive()) {
            return Ok(link.clone());
        }

        let reconnecting = current.is_some();
        let link = self.connect().await?;
        self.handshake(&link).await?;
        *current = Some(link.clone());
        drop(current);

        if reconnecting {
            info!(socket = %self.inner.socket_path.display(), "reconnected to lock service");
            self.resubscribe(&link).await;
        }
        Ok(link)
    }

    /// Open a connection, retrying with backoff
    async fn connect(&self) -> Result<Link, LockClientError> {
        let policy = self.inner.reconnect;
        let attempts = policy.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let connect = UnixStream::connect(&self.inner.socket_path);
            match tokio::time::timeout(self.inner.timeouts.connect, connect).await {
                Ok(Ok(stream)) => {
                    debug!(socket = %self.inner.socket_path.display(), attempt, "connected");
                    return Ok(open_link(&self.inner, stream));
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("connect timed out after {:?}", self.inner.timeouts.connect)
                }
            }

            if attempt < attempts {
                let delay = policy.delay_after(attempt);
                debug!(attempt, ?delay, error = %last_error, "connect failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }

        Err(LockClientError::Unavailable(format!(
            "{}: {}",
            self.inner.socket_path.display(),
            last_error
        )))
    }

    async fn handshake(&self, link: &Link) -> Result<(), LockClientError> {
        let hello = Request::Hello {
            version: PROTOCOL_VERSION.to_string(),
        };
        match link
            .request(self.next_id(), hello, self.inner.timeouts.ipc)
            .await?
        {
            Response::Hello { version } if version == PROTOCOL_VERSION => Ok(()),
            Response::Hello { version } => Err(LockClientError::Rejected(format!(
                "protocol version mismatch: daemon speaks {}, client speaks {}",
                version, PROTOCOL_VERSION
            ))),
            other => Err(unexpected(other)),
        }
    }

    /// Re-register waiting tokens on a new connection
    ///
    /// A grant pushed while disconnected is lost, so each waiter's resource
    /// is also checked for a holder carrying its token.
    async fn resubscribe(&self, link: &Link) {
        let timeout = self.inner.timeouts.ipc;
        for (token, resource) in self.inner.waiters.pending() {
            let subscribe = Request::Subscribe {
                token: token.clone(),
            };
            if let Err(e) = link.request(self.next_id(), subscribe, timeout).await {
                warn!(token, error = %e, "resubscribe failed");
                return;
            }

            let query = Request::Query {
                query: Query::GetResource {
                    resource: resource.clone(),
                },
            };
            match link.request(self.next_id(), query, timeout).await {
                Ok(Response::Resource {
                    resource: Some(snapshot),
                }) => {
                    let holds = snapshot
                        .holder
                        .as_ref()
                        .is_some_and(|holder| holder.token == token && !holder.expired);
                    if holds && self.inner.waiters.complete(&token) {
                        info!(resource, token, "grant recovered after reconnect");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(token, error = %e, "grant check after reconnect failed");
                    return;
                }
            }
        }
    }

    async fn unsubscribe_quietly(&self, token: &str) {
        let link = {
            let current = self.inner.link.lock().await;
            current.as_ref().filter(|link| link.is_alive()).cloned()
        };
        if let Some(link) = link {
            let request = Request::Unsubscribe {
                token: token.to_string(),
            };
            if let Err(e) = link
                .request(self.next_id(), request, self.inner.timeouts.ipc)
                .await
            {
                debug!(token, error = %e, "unsubscribe failed");
            }
        }
    }
}

#[async_trait]
impl LockClient for HubLockClient {
    fn identity(&self) -> &str {
        &self.inner.identity
    }

    async fn acquire_with_token(
        &self,
        resource: &str,
        lease: Duration,
        wait_timeout: Duration,
        token: &str,
    ) -> Result<(), LockClientError> {
        let deadline = tokio::time::Instant::now() + wait_timeout;
        let link = self.link().await?;

        // The daemon subscribes this connection to the token before it can
        // grant, so the push cannot race the reply. Every early return, and a
        // caller dropping this future, frees the slot with `granted`.
        let granted = self.inner.waiters.register(token, resource);
        let request = Request::AcquireLock {
            resource: resource.to_string(),
            lease_ms: millis(lease),
            wait_timeout_ms: millis(wait_timeout),
            token: Some(token.to_string()),
        };

        match link
            .request(self.next_id(), request, self.inner.timeouts.ipc)
            .await?
        {
            Response::LockReserved {
                granted: immediate, ..
            } => {
                debug!(resource, token, immediate, "lock reserved");
            }
            Response::Error { message } => return Err(LockClientError::Rejected(message)),
            _ => return Err(LockClientError::UnexpectedResponse),
        }

        match tokio::time::timeout_at(deadline, granted).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(LockClientError::unavailable(
                "wait for grant was abandoned",
            )),
            Err(_) => {
                self.unsubscribe_quietly(token).await;
                Err(LockClientError::Timeout {
                    resource: resource.to_string(),
                    waited: wait_timeout,
                })
            }
        }
    }

    async fn release(&self, token: &str) -> Result<(), LockClientError> {
        self.inner.waiters.cancel(token);
        match self
            .call(Request::ReleaseLock {
                token: token.to_string(),
            })
            .await?
        {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Response) -> LockClientError {
    match response {
        Response::Error { message } => LockClientError::Rejected(message),
        _ => LockClientError::UnexpectedResponse,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn open_link(inner: &Arc<HubInner>, stream: UnixStream) -> Link {
    let (reader, writer) = stream.into_split();
    let (outbound, rx) = mpsc::unbounded_channel();
    let link = Link {
        outbound,
        replies: Replies::default(),
        alive: Arc::new(AtomicBool::new(true)),
    };

    tokio::spawn(write_requests(
        writer,
        rx,
        Arc::clone(&link.alive),
        inner.timeouts.ipc,
    ));
    tokio::spawn(read_frames(
        reader,
        link.replies.clone(),
        Arc::clone(&link.alive),
        inner.waiters.clone(),
        Arc::downgrade(inner),
    ));
    link
}

async fn write_requests(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<RequestFrame>,
    alive: Arc<AtomicBool>,
    timeout: Duration,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = protocol::write_frame(&mut writer, &frame, timeout).await {
            warn!(error = %e, "failed to send request");
            alive.store(false, Ordering::SeqCst);
            break;
        }
    }
}

async fn read_frames(
    mut reader: OwnedReadHalf,
    replies: Replies,
    alive: Arc<AtomicBool>,
    waiters: Waiters,
    client: Weak<HubInner>,
) {
    loop {
        match protocol::read_frame::<ServerFrame, _>(&mut reader).await {
            Ok(ServerFrame::Reply { id, response }) => replies.complete(id, response),
            Ok(ServerFrame::Push(Push::NotifyLockAcquired { resource, token })) => {
                if !waiters.complete(&token) {
                    debug!(resource, token, "grant for a caller that stopped waiting");
                }
            }
            Err(ProtocolError::ConnectionClosed) => {
                debug!("lock service closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "lost connection to lock service");
                break;
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    replies.close();

    // Callers still blocked in acquire need a connection for their grant
    if waiters.is_empty() {
        return;
    }
    if let Some(inner) = client.upgrade() {
        let client = HubLockClient { inner };
        tokio::spawn(async move {
            if let Err(e) = client.link().await {
                warn!(error = %e, "reconnect failed; waiting callers will time out");
            }
        });
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
