// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-resource gates
//!
//! A gate is a binary mutex plus a validity flag. Gates live in a shared map
//! and are created on first use. The caller that leaves a resource idle
//! retires its gate: the flag is cleared and the map entry removed while the
//! gate is still held. Anyone who fetched the gate before removal and then
//! wins the mutex sees the cleared flag and starts over with a fresh gate.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

#[derive(Debug)]
struct GateSlot {
    valid: bool,
}

#[derive(Clone, Debug)]
struct ResourceGate {
    slot: Arc<Mutex<GateSlot>>,
}

impl ResourceGate {
    fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(GateSlot { valid: true })),
        }
    }

    fn same_as(&self, other: &ResourceGate) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

/// Exclusive hold on a resource's gate; released on drop
#[derive(Debug)]
pub(crate) struct GateGuard {
    resource: String,
    gate: ResourceGate,
    slot: OwnedMutexGuard<GateSlot>,
}

impl GateGuard {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn is_valid(&self) -> bool {
        self.slot.valid
    }
}

#[derive(Debug, Default)]
pub(crate) struct GateMap {
    gates: DashMap<String, ResourceGate>,
}

impl GateMap {
    /// Hold the resource's current gate, retrying past retired ones
    pub async fn enter(&self, resource: &str) -> GateGuard {
        let mut retries = 0u32;
        loop {
            let gate = self.fetch_or_create(resource);
            let slot = Arc::clone(&gate.slot).lock_owned().await;
            if slot.valid {
                return GateGuard {
                    resource: resource.to_string(),
                    gate,
                    slot,
                };
            }
            retries += 1;
            trace!(resource, retries, "gate retired while waiting, retrying");
        }
    }

    fn fetch_or_create(&self, resource: &str) -> ResourceGate {
        if let Some(gate) = self.gates.get(resource) {
            return gate.value().clone();
        }
        self.gates
            .entry(resource.to_string())
            .or_insert_with(ResourceGate::new)
            .value()
            .clone()
    }

    /// Invalidate and evict the held gate, then release it
    pub fn retire(&self, mut guard: GateGuard) {
        guard.slot.valid = false;
        self.gates
            .remove_if(&guard.resource, |_, gate| gate.same_as(&guard.gate));
        trace!(resource = %guard.resource, "gate retired");
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.gates.contains_key(resource)
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
