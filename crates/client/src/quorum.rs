// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Quorum backend: majority agreement across independent lock services
//!
//! The same token is requested from every member at once. The lock is held
//! when a majority grant it while the lease is still running; otherwise any
//! partial grants are released and the acquire fails.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::LockClientError;
use crate::hub::HubLockClient;
use crate::traits::LockClient;

pub struct QuorumLockClient<L = HubLockClient> {
    identity: String,
    members: Vec<L>,
}

impl QuorumLockClient<HubLockClient> {
    /// One hub client per configured endpoint
    pub fn from_config(config: &ClientConfig) -> Self {
        let members = config
            .quorum
            .endpoints
            .iter()
            .map(|socket| HubLockClient::new(socket.clone(), config.timeouts, config.reconnect))
            .collect();
        Self::new(members)
    }
}

impl<L: LockClient + Clone> QuorumLockClient<L> {
    pub fn new(members: Vec<L>) -> Self {
        Self {
            identity: format!("dlock quorum ({} members)", members.len()),
            members,
        }
    }

    pub fn members(&self) -> &[L] {
        &self.members
    }

    /// Grants needed to hold a lock
    pub fn majority(&self) -> usize {
        self.members.len() / 2 + 1
    }

    /// Failures that can be tolerated while still reaching a majority
    fn tolerance(&self) -> usize {
        self.members.len().saturating_sub(self.majority())
    }

    /// Best-effort release on the given members
    async fn release_on(&self, indices: &[usize], token: &str) {
        let mut releases = JoinSet::new();
        for &index in indices {
            let Some(member) = self.members.get(index).cloned() else {
                continue;
            };
            let token = token.to_string();
            releases.spawn(async move { (index, member.release(&token).await) });
        }
        while let Some(joined) = releases.join_next().await {
            if let Ok((index, Err(e))) = joined {
                warn!(member = index, token, error = %e, "could not release partial grant");
            }
        }
    }

    fn failure(
        &self,
        resource: &str,
        wait_timeout: Duration,
        failures: Vec<LockClientError>,
    ) -> LockClientError {
        let unavailable = failures
            .iter()
            .filter(|e| matches!(e, LockClientError::Unavailable(_)))
            .count();
        if unavailable > self.tolerance() || self.members.is_empty() {
            return LockClientError::Unavailable(format!(
                "{} of {} members unreachable",
                unavailable,
                self.members.len()
            ));
        }
        if let Some(rejected) = failures
            .into_iter()
            .find(|e| matches!(e, LockClientError::Rejected(_)))
        {
            return rejected;
        }
        LockClientError::Timeout {
            resource: resource.to_string(),
            waited: wait_timeout,
        }
    }
}

#[async_trait]
impl<L: LockClient + Clone> LockClient for QuorumLockClient<L> {
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
        let started = Instant::now();
        let mut attempts = JoinSet::new();
        for (index, member) in self.members.iter().cloned().enumerate() {
            let resource = resource.to_string();
            let token = token.to_string();
            attempts.spawn(async move {
                let result = member
                    .acquire_with_token(&resource, lease, wait_timeout, &token)
                    .await;
                (index, result)
            });
        }

        let majority = self.majority();
        let tolerance = self.tolerance();
        let mut granted = Vec::new();
        let mut declined = Vec::new();
        let mut failures = Vec::new();

        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok((index, Ok(()))) => granted.push(index),
                Ok((index, Err(e))) => {
                    debug!(member = index, resource, token, error = %e, "member did not grant");
                    declined.push(index);
                    failures.push(e);
                }
                Err(e) => failures.push(LockClientError::Unavailable(format!(
                    "member task failed: {}",
                    e
                ))),
            }
            if granted.len() >= majority || failures.len() > tolerance {
                break;
            }
        }
        // Stragglers stop waiting; their reservations lapse on their own
        attempts.abort_all();

        // A straggler may have been granted before it was aborted
        let maybe_granted: Vec<usize> = (0..self.members.len())
            .filter(|index| !declined.contains(index))
            .collect();

        let elapsed = started.elapsed();
        if granted.len() >= majority {
            if elapsed < lease {
                info!(
                    resource,
                    token,
                    granted = granted.len(),
                    members = self.members.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "quorum lock acquired"
                );
                return Ok(());
            }
            warn!(
                resource,
                token,
                elapsed_ms = elapsed.as_millis() as u64,
                "lease ran out while gathering a majority"
            );
            self.release_on(&maybe_granted, token).await;
            return Err(LockClientError::Timeout {
                resource: resource.to_string(),
                waited: elapsed,
            });
        }

        self.release_on(&maybe_granted, token).await;
        Err(self.failure(resource, wait_timeout, failures))
    }

    async fn release(&self, token: &str) -> Result<(), LockClientError> {
        let mut releases = JoinSet::new();
        for (index, member) in self.members.iter().cloned().enumerate() {
            let token = token.to_string();
            releases.spawn(async move { (index, member.release(&token).await) });
        }

        let mut released = 0;
        let mut last_error = None;
        while let Some(joined) = releases.join_next().await {
            match joined {
                Ok((_, Ok(()))) => released += 1,
                Ok((index, Err(e))) => {
                    debug!(member = index, token, error = %e, "member release failed");
                    last_error = Some(e);
                }
                Err(e) => {
                    last_error = Some(LockClientError::Unavailable(format!(
                        "member task failed: {}",
                        e
                    )))
                }
            }
        }

        match last_error {
            Some(e) if released == 0 => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
#[path = "quorum_tests.rs"]
mod tests;
