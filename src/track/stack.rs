//! # Call-stack guard for self-rescheduling callbacks.
//!
//! A timer callback that reschedules itself on every run would otherwise open
//! a fresh handle per link and hold the counter above zero forever. The guard
//! keeps the identity chain of the callbacks currently executing:
//!
//! - at schedule time, the tracker snapshots the ambient chain and checks
//!   whether the callback being scheduled is already in it — if so, this is
//!   recursive self-rescheduling and the link is not tracked;
//! - while a wrapped callback runs, [`CallStackGuard::enter`] installs its
//!   chain (the inherited one plus, for tracked links, the callback itself);
//!   the returned scope restores the previous chain when the callback
//!   returns, on success and on unwind alike.
//!
//! Identity is pointer identity of the scheduled callback `Arc` — two
//! distinct callback values doing equivalent work are distinct links. The
//! chain lives on the guard instance owned by the session; there is no
//! thread-local or global state.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::host::TimerCallback;

/// Identity of a scheduled callback value.
pub(crate) type CallbackId = usize;

/// Returns the identity of a callback value (clones share it).
pub(crate) fn callback_id(callback: &TimerCallback) -> CallbackId {
    Arc::as_ptr(callback) as *const () as usize
}

/// Ambient chain of in-flight callback identities.
pub(crate) struct CallStackGuard {
    ambient: Mutex<Vec<CallbackId>>,
}

impl CallStackGuard {
    pub(crate) fn new() -> Self {
        Self {
            ambient: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the chain inherited from the currently executing callback.
    pub(crate) fn ambient(&self) -> Vec<CallbackId> {
        self.ambient.lock().clone()
    }

    /// Installs `chain` for the duration of the returned scope.
    pub(crate) fn enter(&self, chain: Vec<CallbackId>) -> AmbientScope<'_> {
        let previous = std::mem::replace(&mut *self.ambient.lock(), chain);
        AmbientScope {
            guard: self,
            previous: Some(previous),
        }
    }
}

/// Restores the previous ambient chain on drop.
pub(crate) struct AmbientScope<'a> {
    guard: &'a CallStackGuard,
    previous: Option<Vec<CallbackId>>,
}

impl Drop for AmbientScope<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.guard.ambient.lock() = previous;
        }
    }
}
