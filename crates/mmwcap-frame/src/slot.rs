use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

/// A single-item, overwrite-on-write handoff between one producer and any
/// number of consumers.
///
/// The producer publishes every completed frame; an unread frame is replaced
/// by the next one, so memory stays bounded no matter how slow consumers are.
/// Values are shared as `Arc<T>`, so the lock is held only for a pointer swap.
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    fresh: Condvar,
}

struct SlotState<T> {
    value: Option<Arc<T>>,
    fresh: bool,
    published: u64,
    overwritten: u64,
    consumed: u64,
}

/// Counters describing slot traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotStats {
    /// Values published by the producer.
    pub published: u64,
    /// Values replaced before any consumer read them.
    pub overwritten: u64,
    /// Fresh values handed to consumers.
    pub consumed: u64,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                fresh: false,
                published: 0,
                overwritten: 0,
                consumed: 0,
            }),
            fresh: Condvar::new(),
        }
    }

    /// Replace the current value and mark it fresh, waking waiting consumers.
    pub fn publish(&self, value: T) {
        self.publish_arc(Arc::new(value));
    }

    /// Like [`LatestSlot::publish`] for a value that is already shared.
    pub fn publish_arc(&self, value: Arc<T>) {
        let previous = {
            let mut state = self.lock();
            if state.fresh {
                state.overwritten += 1;
            }
            state.published += 1;
            state.fresh = true;
            state.value.replace(value)
        };
        self.fresh.notify_all();
        // The old frame may be the last reference; free it outside the lock.
        drop(previous);
    }

    /// Take the value if it is fresh, clearing the fresh flag.
    pub fn take_fresh(&self) -> Option<Arc<T>> {
        let mut state = self.lock();
        Self::take_locked(&mut state)
    }

    /// Wait up to `timeout` for a fresh value and take it.
    ///
    /// Returns immediately if a fresh value is already present. Returns
    /// `None` if nothing was published in time.
    pub fn wait_fresh(&self, timeout: Duration) -> Option<Arc<T>> {
        let state = self.lock();
        let (mut state, _timed_out) = self
            .fresh
            .wait_timeout_while(state, timeout, |state| !state.fresh)
            .unwrap_or_else(PoisonError::into_inner);
        Self::take_locked(&mut state)
    }

    /// The most recent value, fresh or not, without clearing the flag.
    pub fn peek(&self) -> Option<Arc<T>> {
        self.lock().value.clone()
    }

    pub fn is_fresh(&self) -> bool {
        self.lock().fresh
    }

    pub fn stats(&self) -> SlotStats {
        let state = self.lock();
        SlotStats {
            published: state.published,
            overwritten: state.overwritten,
            consumed: state.consumed,
        }
    }

    fn take_locked(state: &mut SlotState<T>) -> Option<Arc<T>> {
        if !state.fresh {
            return None;
        }
        state.fresh = false;
        state.consumed += 1;
        state.value.clone()
    }

    // Slot contents are always whole values, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for LatestSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("LatestSlot")
            .field("has_value", &state.value.is_some())
            .field("fresh", &state.fresh)
            .field("published", &state.published)
            .finish()
    }
}
