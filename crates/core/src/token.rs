// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock token generation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Upper bound on the length of a client-chosen token
pub const MAX_TOKEN_LEN: usize = 128;

/// Mints opaque tokens identifying a single acquisition
pub trait TokenGen: Clone + Send + Sync + 'static {
    fn next_token(&self) -> String;
}

/// Random v4 UUID tokens for production use
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidTokens;

impl TokenGen for UuidTokens {
    fn next_token(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Predictable `prefix-N` tokens for tests; clones share the counter
#[derive(Clone, Debug)]
pub struct SequentialTokens {
    prefix: String,
    counter: Arc<AtomicU64>,
}

impl SequentialTokens {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for SequentialTokens {
    fn default() -> Self {
        Self::new("tok")
    }
}

impl TokenGen for SequentialTokens {
    fn next_token(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, n)
    }
}

/// Whether a client-supplied token can be used as a registry key
pub fn is_well_formed(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && !token.chars().any(|c| c.is_whitespace() || c.is_control())
}
