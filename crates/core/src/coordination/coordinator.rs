// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock coordinator
//!
//! Decides who holds each resource and who waits for it. All reads and
//! writes of one resource's registry entries happen while holding that
//! resource's gate. Expired leases are reclaimed lazily when the resource is
//! next contended, and expired waiters are dropped only when their turn
//! comes, so there is no background sweeper.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info};

use super::gate::{GateGuard, GateMap};
use super::notify::{Grant, GrantNotifier};
use super::registry::{AcquiredLock, LockRequest, Registry, ResourceSnapshot};
use crate::clock::{Clock, SystemClock};
use crate::token::{self, TokenGen, UuidTokens};

/// Arguments to [`LockCoordinator::acquire`]
#[derive(Clone, Debug)]
pub struct AcquireParams {
    pub resource: String,
    pub lease: Duration,
    /// How long the request may wait in the queue
    pub wait_timeout: Duration,
    /// Token chosen by the client; minted by the coordinator when absent
    pub token: Option<String>,
    pub requester: String,
}

impl AcquireParams {
    pub fn new(resource: impl Into<String>, lease: Duration, wait_timeout: Duration) -> Self {
        Self {
            resource: resource.into(),
            lease,
            wait_timeout,
            token: None,
            requester: String::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = requester.into();
        self
    }
}

/// Result of an acquire call
///
/// Either way the token is only confirmed as holder once the grant
/// notification for it is delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted { token: String },
    /// Waiting behind `position - 1` other requests
    Enqueued { token: String, position: usize },
}

impl AcquireOutcome {
    pub fn token(&self) -> &str {
        match self {
            AcquireOutcome::Granted { token } | AcquireOutcome::Enqueued { token, .. } => token,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, AcquireOutcome::Granted { .. })
    }
}

/// Result of a release call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Token unknown, already released, or its lease was reclaimed
    NotHeld,
    Released {
        /// Waiter that now holds the resource
        promoted: Option<String>,
        /// Waiters dropped because their wait deadline had passed
        skipped: usize,
        /// Resource left with no holder, queue or gate
        idle: bool,
    },
}

/// Aggregate counters across all resources
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub resources_held: usize,
    pub requests_waiting: usize,
    pub gates: usize,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("resource name must not be empty")]
    EmptyResource,

    #[error("lease must be longer than zero")]
    InvalidLease,

    #[error("malformed token {0:?}")]
    MalformedToken(String),

    #[error("token {0} already holds a lock")]
    TokenInUse(String),

    #[error("could not grant {resource} to waiter {token} after release: registry out of sync")]
    PromotionFailed { resource: String, token: String },
}

/// Grants, queues and releases locks on named resources
pub struct LockCoordinator<N, C = SystemClock, T = UuidTokens> {
    registry: Registry,
    gates: GateMap,
    notifier: N,
    clock: C,
    tokens: T,
}

impl<N: GrantNotifier> LockCoordinator<N> {
    /// Coordinator on the system clock with random tokens
    pub fn with_notifier(notifier: N) -> Self {
        Self::new(notifier, SystemClock, UuidTokens)
    }
}

impl<N, C, T> LockCoordinator<N, C, T>
where
    N: GrantNotifier,
    C: Clock,
    T: TokenGen,
{
    pub fn new(notifier: N, clock: C, tokens: T) -> Self {
        Self {
            registry: Registry::default(),
            gates: GateMap::default(),
            notifier,
            clock,
            tokens,
        }
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Grant the resource now if it is free, otherwise queue the request
    pub async fn acquire(&self, params: AcquireParams) -> Result<AcquireOutcome, CoordinatorError> {
        if params.resource.is_empty() {
            return Err(CoordinatorError::EmptyResource);
        }
        if params.lease.is_zero() {
            return Err(CoordinatorError::InvalidLease);
        }

        let token = match params.token {
            Some(token) => {
                if !token::is_well_formed(&token) {
                    return Err(CoordinatorError::MalformedToken(token));
                }
                if !self.registry.claim(&token, &params.resource) {
                    return Err(CoordinatorError::TokenInUse(token));
                }
                token
            }
            None => self.claim_fresh_token(&params.resource),
        };

        let request = LockRequest {
            resource: params.resource,
            token,
            lease: params.lease,
            wait_deadline: self.clock.deadline(params.wait_timeout),
            requester: params.requester,
        };

        let gate = self.gates.enter(&request.resource).await;

        if self.try_grant(&request, self.clock.now()) {
            drop(gate);
            return Ok(AcquireOutcome::Granted {
                token: request.token,
            });
        }

        let token = request.token.clone();
        let resource = request.resource.clone();
        let position = self.registry.enqueue(request);
        drop(gate);

        debug!(resource = %resource, token = %token, position, "lock request enqueued");
        Ok(AcquireOutcome::Enqueued { token, position })
    }

    /// Next generated token not already claimed by a client-chosen one
    fn claim_fresh_token(&self, resource: &str) -> String {
        loop {
            let token = self.tokens.next_token();
            if self.registry.claim(&token, resource) {
                return token;
            }
            debug!(token = %token, "generated token already in use, drawing another");
        }
    }

    /// Release a held lock and hand the resource to the next live waiter
    ///
    /// Unknown and already-released tokens are a no-op.
    pub async fn release(&self, token: &str) -> Result<ReleaseOutcome, CoordinatorError> {
        let Some(lock) = self.registry.lock_by_token(token) else {
            debug!(token, "release of unknown token ignored");
            return Ok(ReleaseOutcome::NotHeld);
        };

        let gate = self.gates.enter(&lock.resource).await;

        // Another release, or a reclaim of the expired lease, may have won the gate first
        if self.registry.holder(&lock.resource).as_ref() != Some(&lock) {
            debug!(resource = %lock.resource, token, "lock no longer held at release");
            self.retire_if_idle(gate);
            return Ok(ReleaseOutcome::NotHeld);
        }

        self.registry.remove(&lock);
        debug!(resource = %lock.resource, token, "lock released");

        let (promoted, skipped) = self.promote_next(&lock.resource)?;
        let idle = self.retire_if_idle(gate);

        Ok(ReleaseOutcome::Released {
            promoted,
            skipped,
            idle,
        })
    }

    /// Grant to the oldest waiter whose deadline has not passed
    ///
    /// Caller must hold the resource's gate, with no holder recorded.
    fn promote_next(&self, resource: &str) -> Result<(Option<String>, usize), CoordinatorError> {
        let now = self.clock.now();
        let mut skipped = 0;

        while let Some(next) = self.registry.pop_waiter(resource) {
            if !next.is_live_at(now) {
                self.registry.abandon(&next);
                skipped += 1;
                info!(
                    resource,
                    token = %next.token,
                    requester = %next.requester,
                    "skipped lock request past its wait deadline"
                );
                continue;
            }

            if !self.try_grant(&next, now) {
                error!(
                    resource,
                    token = %next.token,
                    "free resource refused a grant to the next waiter"
                );
                return Err(CoordinatorError::PromotionFailed {
                    resource: resource.to_string(),
                    token: next.token,
                });
            }
            return Ok((Some(next.token), skipped));
        }

        Ok((None, skipped))
    }

    /// Caller must hold the resource's gate
    fn try_grant(&self, request: &LockRequest, now: Instant) -> bool {
        if let Some(current) = self.registry.holder(&request.resource) {
            if current.is_valid_at(now) {
                return false;
            }
            info!(
                resource = %current.resource,
                stale_token = %current.token,
                expired_ms = now.saturating_duration_since(current.valid_until()).as_millis() as u64,
                "reclaiming expired lease"
            );
            self.registry.remove(&current);
        }

        self.registry.insert(AcquiredLock::new(
            request.resource.clone(),
            request.token.clone(),
            now,
            request.lease,
        ));
        debug!(
            resource = %request.resource,
            token = %request.token,
            lease_ms = request.lease.as_millis() as u64,
            "lock granted"
        );

        self.notifier.notify(Grant {
            resource: request.resource.clone(),
            token: request.token.clone(),
            requester: request.requester.clone(),
        });
        true
    }

    /// Retire the gate when its resource has no footprint left
    fn retire_if_idle(&self, gate: GateGuard) -> bool {
        if self.registry.is_idle(gate.resource()) {
            self.gates.retire(gate);
            true
        } else {
            false
        }
    }

    /// Current state of a resource, `None` when it is idle
    pub fn snapshot(&self, resource: &str) -> Option<ResourceSnapshot> {
        self.registry.snapshot(resource, self.clock.now())
    }

    /// Every resource with a holder or waiters, sorted by name
    pub fn snapshots(&self) -> Vec<ResourceSnapshot> {
        let now = self.clock.now();
        self.registry
            .resources()
            .iter()
            .filter_map(|resource| self.registry.snapshot(resource, now))
            .collect()
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            resources_held: self.registry.held_count(),
            requests_waiting: self.registry.waiting_count(),
            gates: self.gates.len(),
        }
    }

    /// No holder, queue or gate remains for `resource`
    pub fn has_no_footprint(&self, resource: &str) -> bool {
        self.registry.is_idle(resource) && !self.gates.contains(resource)
    }

    /// Number of live token index entries
    pub fn token_count(&self) -> usize {
        self.registry.token_count()
    }

    /// Number of tokens held or queued
    pub fn claimed_count(&self) -> usize {
        self.registry.claim_count()
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
