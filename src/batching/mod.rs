//! Request batching and coalescing
//!
//! One [`BatchingCoalescer`] sits in front of each downstream resource. It
//! turns many per-identifier lookups into few batched downstream calls:
//!
//! ```text
//!  request({a,b}) ─┐
//!  request({b,c}) ─┼─▶ PendingBatch [a, b, c] ──flush──▶ BatchFetcher ──▶ {a: .., c: ..}
//!  request({c})   ─┘        │                                               │
//!                           └── ListenerRegistry  a:[tx]  b:[tx,tx]  c:[tx,tx] ◀─┘
//! ```
//!
//! A batch is flushed when either:
//!
//! - **capacity**: the pending batch reaches `capacity` identifiers; full
//!   batches are dispatched immediately, oldest identifiers first
//! - **debounce**: `flush_delay` has elapsed since the pending batch went
//!   from empty to non-empty; later arrivals do not push the deadline back
//!
//! Every waiter for an identifier receives the same value, or `None` when
//! the downstream call failed or did not mention the identifier.
//!
//! Enqueueing, the capacity check, listener registration, timer rearming
//! and result distribution all happen under one mutex per coalescer, so
//! concurrent callers cannot double-arm the timer, miss the capacity
//! threshold, or register a listener on an entry that was already resolved.

mod coalescer;
mod pending;
mod timer;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

pub use coalescer::{BatchingCoalescer, CoalescerStats};
pub use pending::PendingValue;

/// Source of batched values for one resource type.
///
/// Implementations never fail: a failed batch is reported as an empty map,
/// and identifiers absent from the map resolve to missing.
#[async_trait]
pub trait BatchFetcher<V: Send>: Send + Sync {
    /// Fetch values for one batch of distinct identifiers
    async fn fetch_batch(&self, ids: &[String]) -> HashMap<String, V>;
}

/// Batching rules for a coalescer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    capacity: usize,
    flush_delay: Duration,
}

impl BatchConfig {
    /// Create batching rules; a capacity of zero is treated as one
    pub fn new(capacity: usize, flush_delay: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            flush_delay,
        }
    }

    /// Maximum identifiers per downstream call, and the capacity flush threshold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Debounce delay before a partial batch is flushed
    pub fn flush_delay(&self) -> Duration {
        self.flush_delay
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_BATCH_CAPACITY,
            Duration::from_millis(crate::config::DEFAULT_FLUSH_DELAY_MS),
        )
    }
}

/// What caused a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Pending batch reached capacity
    Capacity,
    /// Debounce timer elapsed
    Timer,
    /// Explicit flush (e.g. on shutdown)
    Manual,
}

impl FlushTrigger {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::Timer => "timer",
            Self::Manual => "manual",
        }
    }
}
