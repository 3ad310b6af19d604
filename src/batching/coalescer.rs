//! Batching coalescer for one downstream resource type

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::Mutex;

use crate::metrics;
use crate::models::ResourceKind;

use super::pending::{ListenerRegistry, PendingValue};
use super::timer::FlushTimer;
use super::{BatchConfig, BatchFetcher, FlushTrigger};

/// Snapshot of a coalescer's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoalescerStats {
    /// Identifiers waiting to be sent downstream
    pub pending: usize,
    /// Identifiers with unresolved waiters (pending or in flight)
    pub waiting: usize,
    /// Whether a debounce timer is armed
    pub timer_armed: bool,
}

/// Mutable state, only touched under the coalescer's mutex
struct State<V> {
    /// FIFO of identifiers not yet sent downstream
    pending: VecDeque<String>,
    listeners: ListenerRegistry<V>,
    timer: FlushTimer,
}

impl<V: Clone> State<V> {
    /// Take up to `capacity` identifiers, oldest first
    fn take_batch(&mut self, capacity: usize) -> Vec<String> {
        let n = capacity.min(self.pending.len());
        self.pending.drain(..n).collect()
    }

    /// Take every pending identifier, `capacity` at a time
    fn take_all(&mut self, capacity: usize) -> Vec<Vec<String>> {
        let mut batches = Vec::new();
        while !self.pending.is_empty() {
            batches.push(self.take_batch(capacity));
        }
        batches
    }
}

struct Shared<V> {
    kind: ResourceKind,
    config: BatchConfig,
    fetcher: Arc<dyn BatchFetcher<V>>,
    state: Mutex<State<V>>,
}

/// Coalesces identifier lookups for one resource type into batched
/// downstream calls.
///
/// Cloning is cheap; clones share the same pending batch, listeners and
/// timer. Requires a Tokio runtime: flushes and the debounce timer run as
/// spawned tasks.
pub struct BatchingCoalescer<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for BatchingCoalescer<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> BatchingCoalescer<V>
where
    V: Clone + Send + 'static,
{
    /// Create a coalescer for `kind` in front of `fetcher`
    pub fn new(kind: ResourceKind, config: BatchConfig, fetcher: Arc<dyn BatchFetcher<V>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                kind,
                config,
                fetcher,
                state: Mutex::new(State {
                    pending: VecDeque::new(),
                    listeners: ListenerRegistry::new(),
                    timer: FlushTimer::new(),
                }),
            }),
        }
    }

    /// Resource type this coalescer serves
    pub fn kind(&self) -> ResourceKind {
        self.shared.kind
    }

    /// Batching rules in effect
    pub fn config(&self) -> BatchConfig {
        self.shared.config
    }

    /// Request values for a set of identifiers.
    ///
    /// Returns one future per distinct identifier. Duplicates in `ids`
    /// collapse. An identifier that already has waiters (queued or in
    /// flight) joins them instead of being queued again; every waiter of an
    /// identifier receives the same value.
    ///
    /// Returns immediately: the only wait is for the coalescer's mutex.
    pub async fn request<I, S>(&self, ids: I) -> HashMap<String, PendingValue<V>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let ids: Vec<String> = ids
            .into_iter()
            .map(Into::into)
            .filter(|id| seen.insert(id.clone()))
            .collect();

        if ids.is_empty() {
            return HashMap::new();
        }

        let shared = &self.shared;
        let capacity = shared.config.capacity();
        let mut futures = HashMap::with_capacity(ids.len());

        let mut state = shared.state.lock().await;
        let was_empty = state.pending.is_empty();

        let mut enqueued = 0;
        for id in ids {
            let (pending, fresh) = state.listeners.register(&id);
            if fresh {
                state.pending.push_back(id.clone());
                enqueued += 1;
            }
            futures.insert(id, pending);
        }

        let requested = futures.len();
        metrics::record_identifiers(shared.kind.name(), requested, requested - enqueued);
        tracing::debug!(
            resource = %shared.kind,
            requested,
            enqueued,
            pending = state.pending.len(),
            "Identifiers registered"
        );

        let mut batches = Vec::new();
        while state.pending.len() >= capacity {
            batches.push(state.take_batch(capacity));
        }

        if !batches.is_empty() {
            if state.pending.is_empty() {
                // Nothing left for the armed timer to flush
                state.timer.cancel();
            }

            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                Shared::dispatch(&shared, batches, FlushTrigger::Capacity).await;
            });
        }

        if was_empty && !state.pending.is_empty() {
            Shared::arm_timer(shared, &mut state);
        }

        futures
    }

    /// Flush everything pending now and wait for the results to be
    /// distributed. Cancels the armed timer.
    pub async fn flush(&self) {
        let batches = {
            let mut state = self.shared.state.lock().await;
            state.timer.cancel();
            state.take_all(self.shared.config.capacity())
        };

        if !batches.is_empty() {
            Shared::dispatch(&self.shared, batches, FlushTrigger::Manual).await;
        }
    }

    /// Snapshot of pending identifiers, waiters and timer state
    pub async fn stats(&self) -> CoalescerStats {
        let state = self.shared.state.lock().await;
        CoalescerStats {
            pending: state.pending.len(),
            waiting: state.listeners.len(),
            timer_armed: state.timer.is_armed(),
        }
    }
}

impl<V> Shared<V>
where
    V: Clone + Send + 'static,
{
    /// (Re)arm the debounce timer. Caller holds the state lock.
    fn arm_timer(shared: &Arc<Self>, state: &mut State<V>) {
        let delay = shared.config.flush_delay();
        let timer_shared = Arc::clone(shared);

        state.timer.rearm(move |epoch| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                Shared::on_timer(timer_shared, epoch).await;
            })
        });

        tracing::debug!(
            resource = %shared.kind,
            delay_ms = delay.as_millis() as u64,
            "Flush timer armed"
        );
    }

    async fn on_timer(shared: Arc<Self>, epoch: u64) {
        let batches = {
            let mut state = shared.state.lock().await;
            if !state.timer.claim(epoch) {
                tracing::debug!(resource = %shared.kind, "Stale flush timer ignored");
                return;
            }
            state.take_all(shared.config.capacity())
        };

        if batches.is_empty() {
            return;
        }

        Shared::dispatch(&shared, batches, FlushTrigger::Timer).await;
    }

    /// Send every batch downstream concurrently and distribute the results
    async fn dispatch(shared: &Arc<Self>, batches: Vec<Vec<String>>, trigger: FlushTrigger) {
        let identifiers: usize = batches.iter().map(Vec::len).sum();
        metrics::record_flush(shared.kind.name(), trigger.as_str(), batches.len());
        tracing::info!(
            resource = %shared.kind,
            trigger = trigger.as_str(),
            batches = batches.len(),
            identifiers,
            "Flushing pending identifiers"
        );

        let calls = batches.into_iter().map(|batch| {
            let shared = Arc::clone(shared);
            async move {
                let values = AssertUnwindSafe(shared.fetcher.fetch_batch(&batch))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!(
                            resource = %shared.kind,
                            batch_size = batch.len(),
                            "Batch fetcher panicked, resolving batch as missing"
                        );
                        HashMap::new()
                    });
                shared.resolve(batch, values).await;
            }
        });
        join_all(calls).await;

        // Arrivals during the flush keep the cycle going
        let mut state = shared.state.lock().await;
        if !state.pending.is_empty() && !state.timer.is_armed() {
            Shared::arm_timer(shared, &mut state);
        }
    }

    async fn resolve(&self, batch: Vec<String>, mut values: HashMap<String, V>) {
        let mut state = self.state.lock().await;

        let mut missing = 0;
        let mut waiters = 0;
        for id in &batch {
            let value = values.remove(id);
            if value.is_none() {
                missing += 1;
            }
            waiters += state.listeners.resolve(id, value);
        }
        drop(state);

        metrics::record_resolution(self.kind.name(), batch.len() - missing, missing);
        tracing::debug!(
            resource = %self.kind,
            batch_size = batch.len(),
            missing,
            waiters,
            "Batch resolved"
        );
    }
}
