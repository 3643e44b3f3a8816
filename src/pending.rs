//! # Pending-work bookkeeping per tracked API family.
//!
//! [`PendingSet`] maps an operation reference (timer id, request id, element
//! id, animation id) to the live [`TaskHandle`] opened for it.
//!
//! ## Rules
//! - At most one live handle per key; a second open for the same key is
//!   refused.
//! - An entry is removed exactly when its handle is ended; closing an unknown
//!   key is a no-op (the operation was never tracked or already completed).
//! - Every close goes through [`TaskHandle::end_deferred`], preserving the
//!   one-turn deferral between a completion signal and the counter release.
//! - Lock scopes are short and never span user callbacks or collaborator
//!   calls, so a callback that schedules or cancels other tracked operations
//!   while running cannot re-enter a held lock.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::wait::{TaskHandle, WaitCounter};

/// Live handles for one tracked API family.
pub(crate) struct PendingSet<K> {
    label: &'static str,
    verbose: bool,
    live: Mutex<HashMap<K, TaskHandle>>,
}

impl<K> PendingSet<K>
where
    K: Copy + Eq + Hash + Debug + Send + 'static,
{
    pub(crate) fn new(label: &'static str, verbose: bool) -> Arc<Self> {
        Arc::new(Self {
            label,
            verbose,
            live: Mutex::new(HashMap::new()),
        })
    }

    /// Opens a handle for `key` with the collaborator.
    ///
    /// Returns false (and opens nothing) if a live handle already exists.
    pub(crate) fn open(&self, key: K, wait: &dyn WaitCounter) -> bool {
        if self.live.lock().contains_key(&key) {
            return false;
        }
        let handle = wait.start();
        self.register(key, handle)
    }

    /// Stores an already-opened handle under `key`.
    ///
    /// Used on paths where the handle must open before the key is known
    /// (open-before-dispatch). A duplicate key releases the incoming handle
    /// and warns — that is a caller bug, not a leak.
    pub(crate) fn register(&self, key: K, handle: TaskHandle) -> bool {
        let mut live = self.live.lock();
        if live.contains_key(&key) {
            drop(live);
            tracing::warn!(family = self.label, key = ?key, "duplicate live handle refused");
            handle.end_deferred();
            return false;
        }
        let _ = live.insert(key, handle);
        drop(live);
        if self.verbose {
            tracing::debug!(family = self.label, key = ?key, "task opened");
        }
        true
    }

    /// Ends (deferred) and removes the handle for `key`, if any.
    pub(crate) fn close(&self, key: K) -> bool {
        let removed = self.live.lock().remove(&key);
        match removed {
            Some(handle) => {
                if self.verbose {
                    tracing::debug!(family = self.label, key = ?key, "task closed");
                }
                handle.end_deferred();
                true
            }
            None => false,
        }
    }

    /// Number of live handles.
    #[cfg(test)]
    pub(crate) fn live(&self) -> usize {
        self.live.lock().len()
    }
}

/// Closes a pending entry on drop — success, error and unwind paths alike.
///
/// `None` keys produce an inert guard, so untracked operations can share the
/// wrapped-callback code path.
pub(crate) struct CloseOnDrop<K>
where
    K: Copy + Eq + Hash + Debug + Send + 'static,
{
    set: Arc<PendingSet<K>>,
    key: Option<K>,
}

impl<K> CloseOnDrop<K>
where
    K: Copy + Eq + Hash + Debug + Send + 'static,
{
    pub(crate) fn new(set: Arc<PendingSet<K>>, key: Option<K>) -> Self {
        Self { set, key }
    }
}

impl<K> Drop for CloseOnDrop<K>
where
    K: Copy + Eq + Hash + Debug + Send + 'static,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let _ = self.set.close(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::WaitPoint;

    #[tokio::test]
    async fn test_open_close_round_trip() {
        let wait = WaitPoint::new();
        let set = PendingSet::new("test", false);

        assert!(set.open(7u64, &wait));
        assert_eq!(wait.pending(), 1);
        assert_eq!(set.live(), 1);

        assert!(set.close(7));
        assert_eq!(set.live(), 0);
        wait.ready().await;
    }

    #[tokio::test]
    async fn test_second_open_for_same_key_refused() {
        let wait = WaitPoint::new();
        let set = PendingSet::new("test", false);

        assert!(set.open(1u64, &wait));
        assert!(!set.open(1, &wait));
        assert_eq!(wait.pending(), 1, "no second handle for a live key");
    }

    #[tokio::test]
    async fn test_close_unknown_key_is_noop() {
        let wait = WaitPoint::new();
        let set: Arc<PendingSet<u64>> = PendingSet::new("test", false);
        assert!(!set.close(42));
        assert_eq!(wait.pending(), 0);
    }

    #[tokio::test]
    async fn test_close_on_drop_guard_closes_once() {
        let wait = WaitPoint::new();
        let set = PendingSet::new("test", false);
        assert!(set.open(3u64, &wait));

        {
            let _guard = CloseOnDrop::new(Arc::clone(&set), Some(3));
        }
        wait.ready().await;
        assert_eq!(set.live(), 0);

        // A second guard for the same key finds nothing to close.
        {
            let _guard = CloseOnDrop::new(Arc::clone(&set), Some(3));
        }
        wait.ready().await;
    }

    #[tokio::test]
    async fn test_inert_guard_for_untracked_work() {
        let wait = WaitPoint::new();
        let set: Arc<PendingSet<u64>> = PendingSet::new("test", false);
        {
            let _guard = CloseOnDrop::new(Arc::clone(&set), None);
        }
        assert_eq!(wait.pending(), 0);
    }
}
