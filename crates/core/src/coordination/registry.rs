// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock registry: active leases and pending queues
//!
//! The registry holds state only. Every mutation for a resource happens
//! while the caller holds that resource's gate; the concurrent maps just let
//! unrelated resources proceed without a shared lock.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

/// A request to acquire a resource, waiting to be granted
#[derive(Clone, Debug)]
pub struct LockRequest {
    pub resource: String,
    pub token: String,
    /// Lease granted once this request is promoted
    pub lease: Duration,
    /// Past this instant the request is no longer eligible for promotion
    pub wait_deadline: Instant,
    /// Connection that issued the request (for logs)
    pub requester: String,
}

impl LockRequest {
    /// Whether the request may still be granted at `now`
    pub fn is_live_at(&self, now: Instant) -> bool {
        now < self.wait_deadline
    }
}

/// A granted lease on a resource
///
/// Two locks are equal when their tokens are equal.
#[derive(Clone, Debug)]
pub struct AcquiredLock {
    pub resource: String,
    pub token: String,
    pub acquired_at: Instant,
    pub lease: Duration,
}

impl AcquiredLock {
    pub fn new(
        resource: impl Into<String>,
        token: impl Into<String>,
        acquired_at: Instant,
        lease: Duration,
    ) -> Self {
        Self {
            resource: resource.into(),
            token: token.into(),
            acquired_at,
            lease,
        }
    }

    pub fn valid_until(&self) -> Instant {
        crate::clock::saturating_add(self.acquired_at, self.lease)
    }

    /// A lock still holds its resource while `now` is before `valid_until`
    pub fn is_valid_at(&self, now: Instant) -> bool {
        self.valid_until() > now
    }

    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.valid_until().saturating_duration_since(now)
    }
}

impl PartialEq for AcquiredLock {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for AcquiredLock {}

impl Hash for AcquiredLock {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token.hash(state);
    }
}

/// Current holder of a resource, as reported to callers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderSnapshot {
    pub token: String,
    /// Lease left before the holder may be reclaimed
    pub remaining_ms: u64,
    /// Lease has elapsed but nobody has contended for the resource since
    pub expired: bool,
}

/// Point-in-time view of one resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub resource: String,
    pub holder: Option<HolderSnapshot>,
    pub waiting: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    by_resource: DashMap<String, AcquiredLock>,
    by_token: DashMap<String, AcquiredLock>,
    queues: DashMap<String, VecDeque<LockRequest>>,
    /// Token to resource for every held or queued request
    claims: DashMap<String, String>,
}

impl Registry {
    pub fn holder(&self, resource: &str) -> Option<AcquiredLock> {
        self.by_resource.get(resource).map(|lock| lock.value().clone())
    }

    pub fn lock_by_token(&self, token: &str) -> Option<AcquiredLock> {
        self.by_token.get(token).map(|lock| lock.value().clone())
    }

    /// Reserve `token` for a request on `resource`
    ///
    /// False when the token is already held or queued anywhere. The claim
    /// follows the request from the queue to the grant and is dropped by
    /// [`Registry::remove`] or [`Registry::abandon`].
    pub fn claim(&self, token: &str, resource: &str) -> bool {
        match self.claims.entry(token.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(resource.to_string());
                true
            }
        }
    }

    /// Drop the claim of a request that left the queue without a grant
    pub fn abandon(&self, request: &LockRequest) {
        self.claims
            .remove_if(&request.token, |_, resource| *resource == request.resource);
    }

    /// Record a grant in both indices
    pub fn insert(&self, lock: AcquiredLock) {
        self.by_token.insert(lock.token.clone(), lock.clone());
        self.by_resource.insert(lock.resource.clone(), lock);
    }

    /// Drop a lock from both indices
    ///
    /// The resource entry is only removed while it still belongs to `lock`.
    pub fn remove(&self, lock: &AcquiredLock) {
        self.by_token.remove(&lock.token);
        self.claims
            .remove_if(&lock.token, |_, resource| *resource == lock.resource);
        self.by_resource
            .remove_if(&lock.resource, |_, held| held.token == lock.token);
    }

    /// Append to the resource's queue, returning the new queue length
    pub fn enqueue(&self, request: LockRequest) -> usize {
        let mut queue = self.queues.entry(request.resource.clone()).or_default();
        queue.push_back(request);
        queue.len()
    }

    /// Take the oldest waiter; the queue entry disappears once it is empty
    pub fn pop_waiter(&self, resource: &str) -> Option<LockRequest> {
        match self.queues.entry(resource.to_string()) {
            Entry::Occupied(mut entry) => {
                let next = entry.get_mut().pop_front();
                if entry.get().is_empty() {
                    entry.remove();
                }
                next
            }
            Entry::Vacant(_) => None,
        }
    }

    pub fn queue_len(&self, resource: &str) -> usize {
        self.queues.get(resource).map_or(0, |queue| queue.len())
    }

    /// No holder and no queue: the resource has no footprint
    pub fn is_idle(&self, resource: &str) -> bool {
        !self.by_resource.contains_key(resource) && !self.queues.contains_key(resource)
    }

    /// Every resource with a holder or a queue
    pub fn resources(&self) -> BTreeSet<String> {
        self.by_resource
            .iter()
            .map(|entry| entry.key().clone())
            .chain(self.queues.iter().map(|entry| entry.key().clone()))
            .collect()
    }

    pub fn held_count(&self) -> usize {
        self.by_resource.len()
    }

    pub fn token_count(&self) -> usize {
        self.by_token.len()
    }

    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.queues.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn snapshot(&self, resource: &str, now: Instant) -> Option<ResourceSnapshot> {
        let holder = self.holder(resource).map(|lock| HolderSnapshot {
            remaining_ms: u64::try_from(lock.remaining_at(now).as_millis()).unwrap_or(u64::MAX),
            expired: !lock.is_valid_at(now),
            token: lock.token,
        });
        let waiting = self.queue_len(resource);

        if holder.is_none() && waiting == 0 {
            return None;
        }

        Some(ResourceSnapshot {
            resource: resource.to_string(),
            holder,
            waiting,
        })
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
