// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn connection(gateway: &NotificationGateway, id: u64) -> (ConnectionId, FrameReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = ConnectionId(id);
    gateway.connect(conn, tx);
    (conn, rx)
}

fn grant(resource: &str, token: &str) -> Grant {
    Grant {
        resource: resource.to_string(),
        token: token.to_string(),
        requester: "conn-1".to_string(),
    }
}

#[test]
fn push_reaches_only_the_subscribed_connection() {
    let gateway = NotificationGateway::new();
    let (a, mut rx_a) = connection(&gateway, 1);
    let (_b, mut rx_b) = connection(&gateway, 2);

    gateway.subscribe(a, "tok-1");
    gateway.notify(grant("orders", "tok-1"));

    assert_eq!(
        rx_a.try_recv().unwrap(),
        ServerFrame::Push(Push::NotifyLockAcquired {
            resource: "orders".to_string(),
            token: "tok-1".to_string(),
        })
    );
    assert!(rx_b.try_recv().is_err());
}

#[test]
fn group_is_dissolved_after_delivery() {
    let gateway = NotificationGateway::new();
    let (a, mut rx) = connection(&gateway, 1);

    gateway.subscribe(a, "tok-1");
    assert_eq!(gateway.deliver("orders", "tok-1"), 1);
    assert_eq!(gateway.subscription_count(), 0);
    assert!(!gateway.is_subscribed(a, "tok-1"));

    assert_eq!(gateway.deliver("orders", "tok-1"), 0);
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[test]
fn grant_without_subscriber_is_dropped() {
    let gateway = NotificationGateway::new();
    let (_a, mut rx) = connection(&gateway, 1);

    gateway.notify(grant("orders", "nobody"));

    assert!(rx.try_recv().is_err());
}

#[test]
fn reconnected_client_receives_push_on_new_connection() {
    let gateway = NotificationGateway::new();
    let (old, _old_rx) = connection(&gateway, 1);
    gateway.subscribe(old, "tok-1");

    assert_eq!(gateway.disconnect(old), 1);
    assert_eq!(gateway.subscription_count(), 0);

    let (new, mut new_rx) = connection(&gateway, 2);
    gateway.subscribe(new, "tok-1");
    assert_eq!(gateway.deliver("orders", "tok-1"), 1);
    assert!(new_rx.try_recv().is_ok());
}

#[test]
fn unsubscribe_stops_delivery() {
    let gateway = NotificationGateway::new();
    let (a, mut rx) = connection(&gateway, 1);

    gateway.subscribe(a, "tok-1");
    gateway.unsubscribe(a, "tok-1");

    assert_eq!(gateway.deliver("orders", "tok-1"), 0);
    assert!(rx.try_recv().is_err());
}

#[test]
fn subscribe_from_unknown_connection_is_ignored() {
    let gateway = NotificationGateway::new();
    assert!(!gateway.subscribe(ConnectionId(9), "tok-1"));

    assert_eq!(gateway.subscription_count(), 0);
}

#[test]
fn subscribe_reports_a_new_membership() {
    let gateway = NotificationGateway::new();
    let (a, _rx) = connection(&gateway, 1);

    assert!(gateway.subscribe(a, "tok-1"));
    assert!(!gateway.subscribe(a, "tok-1"));
    assert_eq!(gateway.subscription_count(), 1);
}

#[test]
fn closed_receiver_counts_as_undelivered() {
    let gateway = NotificationGateway::new();
    let (a, rx) = connection(&gateway, 1);
    gateway.subscribe(a, "tok-1");
    drop(rx);

    assert_eq!(gateway.deliver("orders", "tok-1"), 0);
}

#[test]
fn clones_share_routes() {
    let gateway = NotificationGateway::new();
    let clone = gateway.clone();
    let (a, _rx) = connection(&gateway, 1);

    clone.subscribe(a, "tok-1");

    assert_eq!(gateway.connection_count(), 1);
    assert!(gateway.is_subscribed(a, "tok-1"));
}

#[test]
fn connection_id_display() {
    assert_eq!(ConnectionId(42).to_string(), "conn-42");
}
