//! Identifier types for the reactive system.
//!
//! A subscriber is any computation that depends on reactive values (memos and
//! effects). An observable is anything that can be depended on (atoms, signals,
//! collections and memos). Memos are both.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a subscriber.
///
/// Each derivation (memo or effect) gets a unique ID when created. This ID is
/// used as the key in the observer sets of everything it depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for an observable value.
///
/// This is also the identity used by side tables keyed on reactive handles
/// (see [`Identity`](super::Identity)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservableId(u64);

impl ObservableId {
    /// Generate a new unique observable ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ObservableId {
    fn default() -> Self {
        Self::new()
    }
}
