// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Grant notification seam
//!
//! The coordinator announces each grant through a `GrantNotifier` while it
//! still holds the resource's gate, so implementations must hand the grant
//! off without waiting on I/O.

use std::sync::{Arc, Mutex};

/// A lock was granted to the request identified by `token`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grant {
    pub resource: String,
    pub token: String,
    /// Connection that issued the request
    pub requester: String,
}

/// Receives grants; delivery is fire-and-forget
pub trait GrantNotifier: Send + Sync + 'static {
    fn notify(&self, grant: Grant);
}

impl<N: GrantNotifier + ?Sized> GrantNotifier for Arc<N> {
    fn notify(&self, grant: Grant) {
        (**self).notify(grant)
    }
}

/// Keeps every grant in memory, in grant order
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    grants: Arc<Mutex<Vec<Grant>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grants(&self) -> Vec<Grant> {
        self.grants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Tokens granted so far, oldest first
    pub fn tokens(&self) -> Vec<String> {
        self.grants().into_iter().map(|grant| grant.token).collect()
    }

    pub fn count(&self) -> usize {
        self.grants.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl GrantNotifier for RecordingNotifier {
    fn notify(&self, grant: Grant) {
        self.grants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(grant);
    }
}
