// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! dlock-core: lock coordination for the dlock service
//!
//! This crate provides:
//! - The lock registry (leases by resource and by token, FIFO wait queues)
//! - Per-resource gates that serialize registry mutation and retire when idle
//! - The lock coordinator: grant, enqueue, lazy lease reclaim, fair promotion
//! - The grant notifier seam the transport plugs into

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod clock;
pub mod token;

pub mod coordination;

// Re-exports
pub use clock::{Clock, FakeClock, SystemClock};
pub use coordination::{
    AcquireOutcome, AcquireParams, AcquiredLock, CoordinatorError, CoordinatorStats, Grant,
    GrantNotifier, HolderSnapshot, LockCoordinator, LockRequest, RecordingNotifier,
    ReleaseOutcome, ResourceSnapshot,
};
pub use token::{SequentialTokens, TokenGen, UuidTokens};
