//! # Quiescence-counter collaborator contract.
//!
//! The instrumentation layer does not decide when the program is quiet — it
//! reports units of pending work to an external counter through the
//! [`WaitCounter`] trait and guarantees that every unit it opens is closed
//! exactly once.
//!
//! ## Contract
//! - [`WaitCounter::start`] registers one unit of pending work and returns a
//!   [`TaskHandle`].
//! - [`TaskHandle::end`] releases the unit. It consumes the handle, so a
//!   double release does not compile.
//! - Handle closure triggered by a completion signal is deferred by one task
//!   turn ([`TaskHandle::end_deferred`]): observable as "after the current
//!   synchronous work, before the next externally scheduled turn".
//!
//! ## Reference counter
//! [`WaitPoint`] is a minimal in-crate implementation used by tests and demos
//! (the production counter lives in the embedding environment). It keeps a
//! plain pending count and resolves [`WaitPoint::ready`] once the count drops
//! to zero.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Contract for the external quiescence counter.
///
/// Implementations are expected to be cheap: `start` is invoked synchronously
/// on the host's hot paths (every tracked timer, request and animation).
pub trait WaitCounter: Send + Sync + 'static {
    /// Registers one unit of pending work.
    fn start(&self) -> TaskHandle;
}

/// Lifecycle token for one unit of pending work.
///
/// Created by [`WaitCounter::start`]; owned by exactly one tracker until it
/// calls [`TaskHandle::end`]. Dropping a handle without ending it is a leak —
/// the counter would wait forever — and logs a warning.
pub struct TaskHandle {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl TaskHandle {
    /// Wraps a release action into a handle.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Releases the unit of work. Consumes the handle.
    pub fn end(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    /// Releases the unit of work one task turn after the current one.
    ///
    /// Outside a runtime (teardown paths) the release runs synchronously
    /// instead of being lost.
    pub(crate) fn end_deferred(self) {
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let _task = rt.spawn(async move {
                    tokio::task::yield_now().await;
                    self.end();
                });
            }
            Err(_) => self.end(),
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if self.release.is_some() {
            tracing::warn!("task handle dropped without end; pending count leaked");
        }
    }
}

/// Ends a [`TaskHandle`] (deferred) when dropped.
///
/// Release-on-all-paths guard: settle, error and drop-before-completion all
/// close the handle exactly once.
pub(crate) struct EndOnDrop {
    handle: Option<TaskHandle>,
}

impl EndOnDrop {
    pub(crate) fn new(handle: TaskHandle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl Drop for EndOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.end_deferred();
        }
    }
}

/// Reference quiescence counter.
///
/// ### Properties
/// - **Cloneable**: clones share one pending count.
/// - [`WaitPoint::ready`] resolves as soon as the count is observed at zero;
///   a fresh counter is immediately ready.
/// - [`WaitPoint::when_ready`] is the callback flavor of the same signal.
///
/// Intended for demos and tests; embedders provide their own
/// [`WaitCounter`].
#[derive(Clone, Default)]
pub struct WaitPoint {
    inner: Arc<WaitPointInner>,
}

#[derive(Default)]
struct WaitPointInner {
    pending: AtomicUsize,
    notify: Notify,
}

impl WaitPoint {
    /// Creates a counter with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one unit of pending work.
    pub fn one_more(&self) {
        let _ = self.inner.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Releases one unit of pending work.
    ///
    /// An unbalanced release (count already zero) is logged and ignored
    /// instead of wrapping the counter.
    pub fn one_less(&self) {
        let mut current = self.inner.pending.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                tracing::warn!("one_less without matching one_more");
                return;
            }
            match self.inner.pending.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    if current == 1 {
                        self.inner.notify.notify_waiters();
                    }
                    return;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Current number of pending units.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Resolves once the pending count is zero.
    pub async fn ready(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Invokes `callback` once the pending count reaches zero.
    pub fn when_ready(&self, callback: impl FnOnce() + Send + 'static) {
        let point = self.clone();
        let _task = tokio::spawn(async move {
            point.ready().await;
            callback();
        });
    }
}

impl WaitCounter for WaitPoint {
    fn start(&self) -> TaskHandle {
        self.one_more();
        let point = self.clone();
        TaskHandle::new(move || point.one_less())
    }
}
