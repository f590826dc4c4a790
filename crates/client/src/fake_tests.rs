// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const LEASE: Duration = Duration::from_secs(30);

#[tokio::test]
async fn free_resource_is_granted_immediately() {
    let client = FakeLockClient::new("fake");

    let token = client
        .acquire("orders", LEASE, Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(client.holder("orders"), Some(token.clone()));
    assert_eq!(
        client.calls(),
        vec![LockCall::Acquire {
            resource: "orders".to_string(),
            token,
        }]
    );
}

#[tokio::test]
async fn clones_contend_for_the_same_resource() {
    let first = FakeLockClient::new("fake");
    let second = first.clone();
    first
        .acquire_with_token("orders", LEASE, Duration::from_secs(1), "a")
        .await
        .unwrap();

    let waiter = tokio::spawn(async move {
        second
            .acquire_with_token("orders", LEASE, Duration::from_secs(5), "b")
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    first.release("a").await.unwrap();
    waiter.await.unwrap().unwrap();
    assert_eq!(first.holder("orders").as_deref(), Some("b"));
}

#[tokio::test]
async fn held_resource_times_out() {
    let client = FakeLockClient::new("fake");
    client
        .acquire_with_token("orders", LEASE, Duration::from_secs(1), "a")
        .await
        .unwrap();

    let result = client
        .acquire_with_token("orders", LEASE, Duration::from_millis(20), "b")
        .await;

    assert_eq!(
        result,
        Err(LockClientError::Timeout {
            resource: "orders".to_string(),
            waited: Duration::from_millis(20),
        })
    );
    assert_eq!(client.snapshot("orders").map(|s| s.waiting), Some(1));
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let client = FakeLockClient::new("fake");

    let result = client.acquire("", LEASE, Duration::from_secs(1)).await;

    assert!(matches!(result, Err(LockClientError::Rejected(_))));
}

#[tokio::test]
async fn unavailable_client_fails_every_call() {
    let client = FakeLockClient::new("fake");
    client.set_unavailable(true);

    let acquire = client.acquire("orders", LEASE, Duration::from_secs(1)).await;
    let release = client.release("t-1").await;

    assert!(matches!(acquire, Err(LockClientError::Unavailable(_))));
    assert!(matches!(release, Err(LockClientError::Unavailable(_))));
    assert_eq!(client.holder("orders"), None);
    assert_eq!(client.calls().len(), 2);
}
