// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock coordination
//!
//! This module provides:
//! - **Registry** - leases indexed by resource and token, FIFO wait queues
//! - **Gate** - per-resource mutual exclusion that retires when idle
//! - **LockCoordinator** - acquire, release, lazy reclaim and fair promotion
//! - **GrantNotifier** - where grants leave the coordinator

mod coordinator;
mod gate;
mod notify;
mod registry;

pub use coordinator::{
    AcquireOutcome, AcquireParams, CoordinatorError, CoordinatorStats, LockCoordinator,
    ReleaseOutcome,
};
pub use notify::{Grant, GrantNotifier, RecordingNotifier};
pub use registry::{AcquiredLock, HolderSnapshot, LockRequest, ResourceSnapshot};
