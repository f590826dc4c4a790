// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The lock client capability shared by every backend

use std::time::Duration;

use async_trait::async_trait;

use crate::error::LockClientError;

/// Acquire and release distributed locks
#[async_trait]
pub trait LockClient: Send + Sync + 'static {
    /// Human-readable name of the backend
    fn identity(&self) -> &str;

    /// Block until `resource` is granted under `token`, or `wait_timeout`
    /// passes
    async fn acquire_with_token(
        &self,
        resource: &str,
        lease: Duration,
        wait_timeout: Duration,
        token: &str,
    ) -> Result<(), LockClientError>;

    /// Release a held lock; releasing an unknown token is not an error
    async fn release(&self, token: &str) -> Result<(), LockClientError>;

    /// Block until `resource` is granted under a fresh token, returning it
    async fn acquire(
        &self,
        resource: &str,
        lease: Duration,
        wait_timeout: Duration,
    ) -> Result<String, LockClientError> {
        let token = uuid::Uuid::new_v4().to_string();
        self.acquire_with_token(resource, lease, wait_timeout, &token)
            .await?;
        Ok(token)
    }
}

#[async_trait]
impl<L: LockClient + ?Sized> LockClient for Box<L> {
    fn identity(&self) -> &str {
        (**self).identity()
    }

    async fn acquire_with_token(
        &self,
        resource: &str,
        lease: Duration,
        wait_timeout: Duration,
        token: &str,
    ) -> Result<(), LockClientError> {
        (**self)
            .acquire_with_token(resource, lease, wait_timeout, token)
            .await
    }

    async fn release(&self, token: &str) -> Result<(), LockClientError> {
        (**self).release(token).await
    }
}
