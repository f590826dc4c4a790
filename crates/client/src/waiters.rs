// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-slot wait primitives for callers blocked on a grant

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

/// Pending grants keyed by token; clones share the table
#[derive(Clone, Debug, Default)]
pub(crate) struct Waiters {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    next_id: Arc<AtomicU64>,
}

#[derive(Debug)]
struct Slot {
    id: u64,
    resource: String,
    granted: oneshot::Sender<()>,
}

/// A registered wait; dropping it frees the slot
///
/// Resolves once the token is granted, or with an error when the slot is
/// cancelled or replaced.
#[derive(Debug)]
pub(crate) struct PendingGrant {
    waiters: Waiters,
    token: String,
    id: u64,
    granted: oneshot::Receiver<()>,
}

impl Future for PendingGrant {
    type Output = Result<(), oneshot::error::RecvError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.granted).poll(cx)
    }
}

impl Drop for PendingGrant {
    fn drop(&mut self) {
        self.waiters.forget(&self.token, self.id);
    }
}

impl Waiters {
    /// Start waiting for `token`'s grant on `resource`
    ///
    /// A second registration for the same token replaces the first, whose
    /// wait then observes a closed channel.
    pub fn register(&self, token: &str, resource: &str) -> PendingGrant {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).insert(
            token.to_string(),
            Slot {
                id,
                resource: resource.to_string(),
                granted: tx,
            },
        );
        PendingGrant {
            waiters: self.clone(),
            token: token.to_string(),
            id,
            granted: rx,
        }
    }

    /// Wake the caller waiting on `token`; false when nobody waits
    pub fn complete(&self, token: &str) -> bool {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(token);
        match slot {
            Some(slot) => slot.granted.send(()).is_ok(),
            None => false,
        }
    }

    /// Stop waiting on `token`
    pub fn cancel(&self, token: &str) {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(token);
    }

    /// Remove `token`'s slot if it is still registration `id`
    fn forget(&self, token: &str, id: u64) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.get(token).is_some_and(|slot| slot.id == id) {
            slots.remove(token);
        }
    }

    /// Tokens still waiting, with their resources
    pub fn pending(&self) -> Vec<(String, String)> {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(token, slot)| (token.clone(), slot.resource.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }
}
