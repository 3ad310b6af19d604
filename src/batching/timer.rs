//! Debounce timer handle

use tokio::task::JoinHandle;

/// At most one armed debounce timer per coalescer.
///
/// Each arming bumps the epoch. A timer task must [`claim`](Self::claim)
/// its epoch before flushing; a task that was rearmed or cancelled while it
/// was waking up sees a stale epoch and does nothing.
pub(crate) struct FlushTimer {
    epoch: u64,
    handle: Option<JoinHandle<()>>,
}

impl FlushTimer {
    pub(crate) fn new() -> Self {
        Self {
            epoch: 0,
            handle: None,
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Cancel the armed timer, if any
    pub(crate) fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Cancel the armed timer and arm a new one.
    ///
    /// `spawn` receives the epoch the new timer must claim.
    pub(crate) fn rearm<F>(&mut self, spawn: F)
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        self.cancel();
        self.handle = Some(spawn(self.epoch));
    }

    /// Called by a firing timer task. Disarms and returns true if `epoch`
    /// is still current.
    pub(crate) fn claim(&mut self, epoch: u64) -> bool {
        if self.handle.is_some() && self.epoch == epoch {
            self.handle = None;
            true
        } else {
            false
        }
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
