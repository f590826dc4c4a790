// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn enter_creates_gate_on_demand() {
    let gates = GateMap::default();
    assert!(!gates.contains("r"));

    let guard = gates.enter("r").await;
    assert!(guard.is_valid());
    assert_eq!(guard.resource(), "r");
    assert!(gates.contains("r"));

    // Dropping keeps the gate for the next caller
    drop(guard);
    assert_eq!(gates.len(), 1);
}

#[tokio::test]
async fn retire_evicts_gate() {
    let gates = GateMap::default();
    let guard = gates.enter("r").await;

    gates.retire(guard);

    assert!(!gates.contains("r"));
    assert_eq!(gates.len(), 0);
}

#[tokio::test]
async fn gates_for_different_resources_are_independent() {
    let gates = GateMap::default();
    let a = gates.enter("a").await;

    // Would hang if "b" shared a's mutex
    let b = tokio::time::timeout(Duration::from_secs(1), gates.enter("b"))
        .await
        .expect("gate for b should not wait on a");

    assert_eq!(gates.len(), 2);
    drop((a, b));
}

#[tokio::test]
async fn waiter_on_retired_gate_moves_to_fresh_gate() {
    let gates = Arc::new(GateMap::default());
    let first = gates.enter("r").await;

    let waiting = Arc::clone(&gates);
    let waiter = tokio::spawn(async move {
        let guard = waiting.enter("r").await;
        let valid = guard.is_valid();
        drop(guard);
        valid
    });

    // Let the waiter fetch the current gate and block on it
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    gates.retire(first);

    assert!(waiter.await.unwrap());
    // The waiter created a replacement gate, which was never retired
    assert!(gates.contains("r"));
    assert_eq!(gates.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gate_serializes_critical_sections_across_retirements() {
    let gates = Arc::new(GateMap::default());
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for i in 0..32 {
        let gates = Arc::clone(&gates);
        let inside = Arc::clone(&inside);
        let max_inside = Arc::clone(&max_inside);
        tasks.push(tokio::spawn(async move {
            let guard = gates.enter("shared").await;
            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
            max_inside.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            inside.fetch_sub(1, Ordering::SeqCst);
            // Every other holder retires, forcing queued tasks to retry
            if i % 2 == 0 {
                gates.retire(guard);
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
}
