// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::fake::{FakeLockClient, LockCall};
use yare::parameterized;

const LEASE: Duration = Duration::from_secs(30);
const WAIT: Duration = Duration::from_secs(2);

fn cluster(n: usize) -> (Vec<FakeLockClient>, QuorumLockClient<FakeLockClient>) {
    let members: Vec<_> = (0..n)
        .map(|i| FakeLockClient::new(format!("member-{}", i)))
        .collect();
    let quorum = QuorumLockClient::new(members.clone());
    (members, quorum)
}

fn holders(members: &[FakeLockClient], resource: &str) -> Vec<Option<String>> {
    members.iter().map(|m| m.holder(resource)).collect()
}

#[parameterized(
    one = { 1, 1 },
    two = { 2, 2 },
    three = { 3, 2 },
    four = { 4, 3 },
    five = { 5, 3 },
)]
fn majority_is_more_than_half(members: usize, majority: usize) {
    let (_, quorum) = cluster(members);
    assert_eq!(quorum.majority(), majority);
}

#[tokio::test]
async fn every_member_grants_the_same_token() {
    let (members, quorum) = cluster(3);

    quorum
        .acquire_with_token("orders", LEASE, WAIT, "q-1")
        .await
        .unwrap();

    assert_eq!(holders(&members, "orders"), vec![Some("q-1".to_string()); 3]);
}

#[tokio::test]
async fn majority_survives_one_unreachable_member() {
    let (members, quorum) = cluster(3);
    members[2].set_unavailable(true);

    quorum
        .acquire_with_token("orders", LEASE, WAIT, "q-1")
        .await
        .unwrap();

    assert_eq!(members[0].holder("orders").as_deref(), Some("q-1"));
    assert_eq!(members[1].holder("orders").as_deref(), Some("q-1"));
}

#[tokio::test]
async fn losing_the_majority_is_unavailable_and_releases_partial_grants() {
    let (members, quorum) = cluster(3);
    members[1].set_unavailable(true);
    members[2].set_unavailable(true);

    let result = quorum
        .acquire_with_token("orders", LEASE, WAIT, "q-1")
        .await;

    assert!(
        matches!(result, Err(LockClientError::Unavailable(_))),
        "got {:?}",
        result
    );
    assert_eq!(members[0].holder("orders"), None);
}

#[tokio::test]
async fn contended_majority_times_out() {
    let (members, quorum) = cluster(3);
    for member in &members[..2] {
        member
            .acquire_with_token("orders", LEASE, WAIT, "other")
            .await
            .unwrap();
    }

    let result = quorum
        .acquire_with_token("orders", LEASE, Duration::from_millis(50), "q-1")
        .await;

    assert_eq!(
        result,
        Err(LockClientError::Timeout {
            resource: "orders".to_string(),
            waited: Duration::from_millis(50),
        })
    );
    // The uncontended member granted and was released again
    assert_eq!(members[2].holder("orders"), None);
    assert!(members[2].calls().contains(&LockCall::Release {
        token: "q-1".to_string()
    }));
}

#[tokio::test]
async fn rejection_by_members_is_surfaced() {
    let (_, quorum) = cluster(3);

    let result = quorum.acquire("", LEASE, WAIT).await;

    assert!(
        matches!(result, Err(LockClientError::Rejected(_))),
        "got {:?}",
        result
    );
}

#[tokio::test]
async fn empty_quorum_is_unavailable() {
    let (_, quorum) = cluster(0);

    let result = quorum.acquire("orders", LEASE, WAIT).await;

    assert!(matches!(result, Err(LockClientError::Unavailable(_))));
}

#[tokio::test]
async fn release_reaches_every_member() {
    let (members, quorum) = cluster(3);
    quorum
        .acquire_with_token("orders", LEASE, WAIT, "q-1")
        .await
        .unwrap();

    quorum.release("q-1").await.unwrap();

    assert_eq!(holders(&members, "orders"), vec![None, None, None]);
}

#[tokio::test]
async fn release_succeeds_while_any_member_answers() {
    let (members, quorum) = cluster(3);
    members[0].set_unavailable(true);
    members[1].set_unavailable(true);

    assert!(quorum.release("q-1").await.is_ok());

    members[2].set_unavailable(true);
    let result = quorum.release("q-1").await;
    assert!(matches!(result, Err(LockClientError::Unavailable(_))));
}
