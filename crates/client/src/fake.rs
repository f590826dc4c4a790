// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process lock client for tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dlock_core::{AcquireParams, Grant, GrantNotifier, LockCoordinator, ResourceSnapshot};

use crate::error::LockClientError;
use crate::traits::LockClient;
use crate::waiters::Waiters;

/// Recorded call to a [`FakeLockClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockCall {
    Acquire { resource: String, token: String },
    Release { token: String },
}

impl GrantNotifier for Waiters {
    fn notify(&self, grant: Grant) {
        self.complete(&grant.token);
    }
}

/// Lock client backed by an in-process coordinator
///
/// Clones share the coordinator, so they contend with each other like
/// separate clients of one daemon.
#[derive(Clone)]
pub struct FakeLockClient {
    identity: String,
    coordinator: Arc<LockCoordinator<Waiters>>,
    unavailable: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<LockCall>>>,
}

impl FakeLockClient {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            coordinator: Arc::new(LockCoordinator::with_notifier(Waiters::default())),
            unavailable: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make every call fail as if the service were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<LockCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Token currently holding `resource`
    pub fn holder(&self, resource: &str) -> Option<String> {
        self.snapshot(resource)
            .and_then(|snapshot| snapshot.holder)
            .map(|holder| holder.token)
    }

    pub fn snapshot(&self, resource: &str) -> Option<ResourceSnapshot> {
        self.coordinator.snapshot(resource)
    }

    fn record(&self, call: LockCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    fn check_available(&self) -> Result<(), LockClientError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LockClientError::Unavailable(format!(
                "{} is down",
                self.identity
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LockClient for FakeLockClient {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn acquire_with_token(
        &self,
        resource: &str,
        lease: Duration,
        wait_timeout: Duration,
        token: &str,
    ) -> Result<(), LockClientError> {
        self.record(LockCall::Acquire {
            resource: resource.to_string(),
            token: token.to_string(),
        });
        self.check_available()?;

        let waiters = self.coordinator.notifier();
        let granted = waiters.register(token, resource);
        let params = AcquireParams::new(resource, lease, wait_timeout).with_token(token);
        if let Err(e) = self.coordinator.acquire(params).await {
            return Err(LockClientError::Rejected(e.to_string()));
        }

        match tokio::time::timeout(wait_timeout, granted).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(LockClientError::unavailable(
                "wait for grant was abandoned",
            )),
            Err(_) => Err(LockClientError::Timeout {
                resource: resource.to_string(),
                waited: wait_timeout,
            }),
        }
    }

    async fn release(&self, token: &str) -> Result<(), LockClientError> {
        self.record(LockCall::Release {
            token: token.to_string(),
        });
        self.check_available()?;

        self.coordinator.notifier().cancel(token);
        self.coordinator
            .release(token)
            .await
            .map(|_| ())
            .map_err(|e| LockClientError::Rejected(e.to_string()))
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
