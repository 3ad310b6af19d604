//! Per-identifier result futures and the listener registry that resolves them

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

/// Result of one identifier lookup, resolved when its batch completes.
///
/// Resolves to `None` when the identifier could not be resolved. If the
/// coalescer is torn down before the batch completes, it also resolves to
/// `None` rather than hanging.
#[derive(Debug)]
pub struct PendingValue<V> {
    rx: oneshot::Receiver<Option<V>>,
}

impl<V> Future for PendingValue<V> {
    type Output = Option<V>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(None))
    }
}

/// Waiters per identifier.
///
/// An entry exists from the first registration for an identifier until its
/// batch result is distributed; the entry is removed in the same step, so
/// a later registration always starts a fresh entry.
pub(crate) struct ListenerRegistry<V> {
    listeners: HashMap<String, Vec<oneshot::Sender<Option<V>>>>,
}

impl<V: Clone> ListenerRegistry<V> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: HashMap::new(),
        }
    }

    /// Register a waiter for `id`.
    ///
    /// Returns the waiter's future and whether a fresh entry was created.
    pub(crate) fn register(&mut self, id: &str) -> (PendingValue<V>, bool) {
        let (tx, rx) = oneshot::channel();

        let fresh = match self.listeners.get_mut(id) {
            Some(waiters) => {
                waiters.push(tx);
                false
            }
            None => {
                self.listeners.insert(id.to_string(), vec![tx]);
                true
            }
        };

        (PendingValue { rx }, fresh)
    }

    /// Resolve every waiter for `id` and delete its entry.
    ///
    /// Returns the number of waiters notified.
    pub(crate) fn resolve(&mut self, id: &str, value: Option<V>) -> usize {
        let waiters = self.listeners.remove(id);
        debug_assert!(
            waiters.is_some(),
            "identifier {id:?} resolved without a registry entry"
        );

        let Some(waiters) = waiters else {
            return 0;
        };

        let count = waiters.len();
        for waiter in waiters {
            // A dropped receiver means the caller lost interest
            let _ = waiter.send(value.clone());
        }
        count
    }

    /// Number of identifiers with at least one waiter
    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.listeners.contains_key(id)
    }
}
