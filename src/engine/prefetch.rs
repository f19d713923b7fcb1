//! Book-keeping for background prefetches.
//!
//! Tracks which keys are being prefetched and how many prefetches are active.
//! A slot is taken atomically: the key is recorded and the counter incremented
//! under one lock, and only if the key is new and the counter is below the
//! cap. The slot is given back when its [`PrefetchSlot`] guard drops, which
//! also covers failed and cancelled prefetches.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::CacheKey;

/// Keys being prefetched plus the active prefetch count.
pub(crate) struct PrefetchState {
    keys: Mutex<HashSet<CacheKey>>,
    active: AtomicUsize,
    cap: usize,
}

impl PrefetchState {
    pub(crate) fn new(cap: usize) -> Arc<Self> {
        Arc::new(Self {
            keys: Mutex::new(HashSet::new()),
            active: AtomicUsize::new(0),
            cap,
        })
    }

    /// Take a slot for `key`, or `None` if it is already being prefetched or
    /// the cap is reached.
    pub(crate) fn try_acquire(self: &Arc<Self>, key: &CacheKey) -> Option<PrefetchSlot> {
        let mut keys = self.keys.lock();

        if keys.contains(key) || self.active.load(Ordering::Acquire) >= self.cap {
            return None;
        }

        keys.insert(key.clone());
        self.active.fetch_add(1, Ordering::AcqRel);

        Some(PrefetchSlot {
            state: Arc::clone(self),
            key: key.clone(),
        })
    }

    /// Number of prefetches currently running.
    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Whether `key` is currently being prefetched.
    pub(crate) fn contains(&self, key: &CacheKey) -> bool {
        self.keys.lock().contains(key)
    }

    pub(crate) fn cap(&self) -> usize {
        self.cap
    }
}

/// An acquired prefetch slot. Dropping it releases the key and the count.
pub(crate) struct PrefetchSlot {
    state: Arc<PrefetchState>,
    key: CacheKey,
}

impl Drop for PrefetchSlot {
    fn drop(&mut self) {
        let mut keys = self.state.keys.lock();
        if keys.remove(&self.key) {
            self.state.active.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
