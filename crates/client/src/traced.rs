// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced lock client wrapper for consistent observability

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::Instrument;

use crate::error::LockClientError;
use crate::traits::LockClient;

/// Wrapper that adds tracing to any LockClient
#[derive(Clone)]
pub struct TracedLockClient<L> {
    inner: L,
}

impl<L> TracedLockClient<L> {
    pub fn new(inner: L) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

#[async_trait]
impl<L: LockClient> LockClient for TracedLockClient<L> {
    fn identity(&self) -> &str {
        self.inner.identity()
    }

    async fn acquire_with_token(
        &self,
        resource: &str,
        lease: Duration,
        wait_timeout: Duration,
        token: &str,
    ) -> Result<(), LockClientError> {
        let span = tracing::info_span!(
            "lock.acquire",
            backend = self.inner.identity(),
            resource,
            token
        );

        async {
            tracing::debug!(
                lease_ms = lease.as_millis() as u64,
                wait_ms = wait_timeout.as_millis() as u64,
                "requesting"
            );

            let start = Instant::now();
            let result = self
                .inner
                .acquire_with_token(resource, lease, wait_timeout, token)
                .await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match &result {
                Ok(()) => tracing::info!(elapsed_ms, "acquired"),
                Err(LockClientError::Timeout { .. }) => {
                    tracing::warn!(elapsed_ms, "gave up waiting")
                }
                Err(e) => tracing::error!(elapsed_ms, error = %e, "acquire failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn release(&self, token: &str) -> Result<(), LockClientError> {
        let span = tracing::info_span!("lock.release", backend = self.inner.identity(), token);

        async {
            let result = self.inner.release(token).await;
            match &result {
                Ok(()) => tracing::debug!("released"),
                Err(e) => tracing::error!(error = %e, "release failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
