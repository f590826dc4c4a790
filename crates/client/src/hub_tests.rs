// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hub client tests against a scripted daemon

use dlock_core::HolderSnapshot;
use dlock_daemon::protocol::DEFAULT_TIMEOUT;
use tokio::net::UnixListener;

use super::*;

struct Peer {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn accept(listener: &UnixListener) -> Self {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        let (reader, writer) = stream.into_split();
        Self { reader, writer }
    }

    async fn expect(&mut self) -> RequestFrame {
        tokio::time::timeout(Duration::from_secs(5), protocol::read_frame(&mut self.reader))
            .await
            .expect("client sent nothing")
            .unwrap()
    }

    async fn send(&mut self, frame: ServerFrame) {
        protocol::write_frame(&mut self.writer, &frame, DEFAULT_TIMEOUT)
            .await
            .unwrap();
    }

    async fn reply(&mut self, id: u64, response: Response) {
        self.send(ServerFrame::Reply { id, response }).await;
    }

    async fn push(&mut self, resource: &str, token: &str) {
        self.send(ServerFrame::Push(Push::NotifyLockAcquired {
            resource: resource.to_string(),
            token: token.to_string(),
        }))
        .await;
    }

    /// Answer the Hello handshake
    async fn greet(&mut self) {
        let frame = self.expect().await;
        assert!(matches!(frame.request, Request::Hello { .. }));
        self.reply(
            frame.id,
            Response::Hello {
                version: PROTOCOL_VERSION.to_string(),
            },
        )
        .await;
    }

    /// Read an AcquireLock and return its id and token
    async fn expect_acquire(&mut self) -> (u64, String) {
        let frame = self.expect().await;
        match frame.request {
            Request::AcquireLock {
                token: Some(token), ..
            } => (frame.id, token),
            other => panic!("expected AcquireLock, got {:?}", other),
        }
    }
}

fn fixture() -> (tempfile::TempDir, UnixListener, HubLockClient) {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("hub.sock");
    let listener = UnixListener::bind(&socket).unwrap();
    let client = HubLockClient::new(
        socket,
        Timeouts {
            ipc: Duration::from_secs(2),
            connect: Duration::from_secs(1),
        },
        ReconnectPolicy {
            attempts: 3,
            backoff: Duration::from_millis(20),
        },
    );
    (dir, listener, client)
}

fn reserved(token: &str, granted: bool) -> Response {
    Response::LockReserved {
        token: token.to_string(),
        granted,
    }
}

#[tokio::test]
async fn acquire_returns_once_the_push_arrives() {
    let (_dir, listener, client) = fixture();

    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.greet().await;
        let (id, token) = peer.expect_acquire().await;
        peer.reply(id, reserved(&token, false)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        peer.push("orders", &token).await;
        peer
    });

    let token = client
        .acquire("orders", Duration::from_secs(5), Duration::from_secs(2))
        .await
        .unwrap();
    assert!(!token.is_empty());
    server.await.unwrap();
}

#[tokio::test]
async fn push_ahead_of_the_reply_is_not_missed() {
    let (_dir, listener, client) = fixture();

    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.greet().await;
        let (id, token) = peer.expect_acquire().await;
        peer.push("orders", &token).await;
        peer.reply(id, reserved(&token, true)).await;
        peer
    });

    client
        .acquire_with_token("orders", Duration::from_secs(5), Duration::from_secs(2), "t-1")
        .await
        .unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn missing_grant_times_out_and_unsubscribes() {
    let (_dir, listener, client) = fixture();

    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.greet().await;
        let (id, token) = peer.expect_acquire().await;
        peer.reply(id, reserved(&token, false)).await;

        let frame = peer.expect().await;
        assert_eq!(frame.request, Request::Unsubscribe { token });
        peer.reply(frame.id, Response::Ok).await;
        peer
    });

    let result = client
        .acquire_with_token(
            "orders",
            Duration::from_secs(5),
            Duration::from_millis(100),
            "t-1",
        )
        .await;
    assert_eq!(
        result,
        Err(LockClientError::Timeout {
            resource: "orders".to_string(),
            waited: Duration::from_millis(100),
        })
    );
    server.await.unwrap();
}

#[tokio::test]
async fn dropped_acquire_frees_its_wait() {
    let (_dir, listener, client) = fixture();

    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.greet().await;
        let (id, token) = peer.expect_acquire().await;
        peer.reply(id, reserved(&token, false)).await;
        (peer, listener)
    });

    let abandoned = tokio::time::timeout(
        Duration::from_millis(200),
        client.acquire_with_token("orders", Duration::from_secs(5), Duration::from_secs(5), "t-1"),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(client.inner.waiters.is_empty());

    // Nobody is waiting, so a lost connection is not re-established
    let (peer, listener) = server.await.unwrap();
    drop(peer);
    let reconnect = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(reconnect.is_err());
}

#[tokio::test]
async fn daemon_rejection_is_surfaced() {
    let (_dir, listener, client) = fixture();

    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.greet().await;
        let (id, _) = peer.expect_acquire().await;
        peer.reply(
            id,
            Response::Error {
                message: "lease must be longer than zero".to_string(),
            },
        )
        .await;
        peer
    });

    let result = client
        .acquire("orders", Duration::ZERO, Duration::from_secs(1))
        .await;
    assert_eq!(
        result,
        Err(LockClientError::Rejected(
            "lease must be longer than zero".to_string()
        ))
    );
    server.await.unwrap();
}

#[tokio::test]
async fn protocol_version_mismatch_is_rejected() {
    let (_dir, listener, client) = fixture();

    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let frame = peer.expect().await;
        peer.reply(
            frame.id,
            Response::Hello {
                version: "999".to_string(),
            },
        )
        .await;
        peer
    });

    let result = client.ping().await;
    assert!(matches!(result, Err(LockClientError::Rejected(_))));
    server.await.unwrap();
}

#[tokio::test]
async fn unreachable_daemon_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let client = HubLockClient::new(
        dir.path().join("missing.sock"),
        Timeouts::default(),
        ReconnectPolicy {
            attempts: 2,
            backoff: Duration::from_millis(10),
        },
    );

    let result = client
        .acquire("orders", Duration::from_secs(1), Duration::from_secs(1))
        .await;
    assert!(matches!(result, Err(LockClientError::Unavailable(_))));
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn grant_made_while_disconnected_is_recovered() {
    let (_dir, listener, client) = fixture();

    let server = tokio::spawn(async move {
        let mut first = Peer::accept(&listener).await;
        first.greet().await;
        let (id, token) = first.expect_acquire().await;
        first.reply(id, reserved(&token, false)).await;
        drop(first);

        let mut second = Peer::accept(&listener).await;
        second.greet().await;

        let frame = second.expect().await;
        assert_eq!(
            frame.request,
            Request::Subscribe {
                token: token.clone()
            }
        );
        second.reply(frame.id, Response::Ok).await;

        let frame = second.expect().await;
        assert!(matches!(frame.request, Request::Query { .. }));
        second
            .reply(
                frame.id,
                Response::Resource {
                    resource: Some(ResourceSnapshot {
                        resource: "orders".to_string(),
                        holder: Some(HolderSnapshot {
                            token,
                            remaining_ms: 4000,
                            expired: false,
                        }),
                        waiting: 0,
                    }),
                },
            )
            .await;
        second
    });

    client
        .acquire_with_token("orders", Duration::from_secs(5), Duration::from_secs(3), "t-1")
        .await
        .unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn push_on_the_new_connection_completes_the_wait() {
    let (_dir, listener, client) = fixture();

    let server = tokio::spawn(async move {
        let mut first = Peer::accept(&listener).await;
        first.greet().await;
        let (id, token) = first.expect_acquire().await;
        first.reply(id, reserved(&token, false)).await;
        drop(first);

        let mut second = Peer::accept(&listener).await;
        second.greet().await;
        let frame = second.expect().await;
        second.reply(frame.id, Response::Ok).await;
        let frame = second.expect().await;
        second
            .reply(frame.id, Response::Resource { resource: None })
            .await;

        second.push("orders", &token).await;
        second
    });

    client
        .acquire_with_token("orders", Duration::from_secs(5), Duration::from_secs(3), "t-1")
        .await
        .unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn queries_decode_daemon_replies() {
    let (_dir, listener, client) = fixture();

    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.greet().await;

        let frame = peer.expect().await;
        assert_eq!(frame.request, Request::Status);
        peer.reply(
            frame.id,
            Response::Status {
                uptime_secs: 12,
                resources_held: 3,
                requests_waiting: 4,
                connections: 5,
            },
        )
        .await;

        let frame = peer.expect().await;
        peer.reply(frame.id, Response::Resources { resources: vec![] })
            .await;
        peer
    });

    let status = client.status().await.unwrap();
    assert_eq!(
        status,
        DaemonStatus {
            uptime_secs: 12,
            resources_held: 3,
            requests_waiting: 4,
            connections: 5,
        }
    );
    assert!(client.list_resources().await.unwrap().is_empty());
    assert!(client.is_connected().await);
    server.await.unwrap();
}
