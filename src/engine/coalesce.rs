//! Per-key sharing of in-flight fetch-or-create operations.
//!
//! At most one operation exists per [`CacheKey`]. The first caller on a miss
//! becomes the leader and receives an [`InFlightLease`]; everyone arriving
//! while the lease is alive joins it and waits on the same outcome.
//!
//! ```text
//! claim(k) ──► entry absent ──► Leader(lease) ── complete(v) ──► Done(v)
//!          └─► entry present ─► Joined(handle) ── wait() ──────► v
//! ```
//!
//! The lease releases the map entry before publishing an outcome, and again
//! when dropped, so the entry disappears after success, failure, panic or
//! cancellation alike. A lease dropped without completing resolves its
//! waiters as absent.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::cache::CacheKey;

#[derive(Debug, Clone)]
enum Slot<T> {
    Pending,
    Done(Option<T>),
}

type Entries<T> = Arc<Mutex<HashMap<CacheKey, watch::Receiver<Slot<T>>>>>;

/// Outcome of [`InFlightMap::claim`].
pub(crate) enum Claim<T> {
    /// No operation was running; the caller must run it and complete the lease.
    Leader(InFlightLease<T>),
    /// Another caller owns the operation.
    Joined(InFlightHandle<T>),
}

/// Map of keys to their outstanding operation.
pub(crate) struct InFlightMap<T> {
    entries: Entries<T>,
}

impl<T: Clone> InFlightMap<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Join the operation for `key`, or register a new one.
    ///
    /// Lookup and insertion happen under one lock, so two callers can never
    /// both become leader for the same key.
    pub(crate) fn claim(&self, key: &CacheKey) -> Claim<T> {
        let mut entries = self.entries.lock();

        if let Some(rx) = entries.get(key) {
            return Claim::Joined(InFlightHandle { rx: rx.clone() });
        }

        let (tx, rx) = watch::channel(Slot::Pending);
        entries.insert(key.clone(), rx);

        Claim::Leader(InFlightLease {
            key: key.clone(),
            tx,
            entries: Arc::clone(&self.entries),
            released: false,
        })
    }

    /// Whether an operation for `key` is outstanding.
    pub(crate) fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Number of outstanding operations.
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Ownership of an outstanding operation.
pub(crate) struct InFlightLease<T> {
    key: CacheKey,
    tx: watch::Sender<Slot<T>>,
    entries: Entries<T>,
    released: bool,
}

impl<T> InFlightLease<T> {
    /// A handle resolving to this lease's outcome.
    pub(crate) fn handle(&self) -> InFlightHandle<T> {
        InFlightHandle {
            rx: self.tx.subscribe(),
        }
    }

    /// Release the key and publish the outcome to every waiter.
    ///
    /// The entry is gone before any waiter wakes up, so a request issued
    /// after observing the outcome starts a fresh operation.
    pub(crate) fn complete(mut self, outcome: Option<T>) {
        self.release();
        self.tx.send_replace(Slot::Done(outcome));
    }

    fn release(&mut self) {
        if !self.released {
            self.entries.lock().remove(&self.key);
            self.released = true;
        }
    }
}

impl<T> Drop for InFlightLease<T> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Awaitable view of an operation owned by someone else.
pub(crate) struct InFlightHandle<T> {
    rx: watch::Receiver<Slot<T>>,
}

impl<T: Clone> InFlightHandle<T> {
    /// Wait for the outcome. An abandoned operation yields `None`.
    pub(crate) async fn wait(mut self) -> Option<T> {
        let outcome = match self.rx.wait_for(|slot| matches!(slot, Slot::Done(_))).await {
            Ok(slot) => match &*slot {
                Slot::Done(outcome) => outcome.clone(),
                Slot::Pending => None,
            },
            Err(_) => None,
        };
        outcome
    }
}
