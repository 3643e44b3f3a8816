//! Shared test support: a counting spy around the reference counter.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use quiesce::{TaskHandle, WaitCounter, WaitPoint};

/// [`WaitCounter`] spy: counts opens and closes while delegating to a
/// [`WaitPoint`], so tests can assert the balance invariant directly.
#[derive(Clone, Default)]
pub struct CountingWait {
    point: WaitPoint,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl CountingWait {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles opened so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Handles closed so far.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Currently pending units.
    pub fn pending(&self) -> usize {
        self.point.pending()
    }

    /// Resolves once nothing is pending.
    pub async fn ready(&self) {
        self.point.ready().await;
    }

    /// Asserts that every opened handle was closed.
    pub fn assert_balanced(&self) {
        assert_eq!(
            self.opens(),
            self.closes(),
            "open/close balance violated: {} opened, {} closed",
            self.opens(),
            self.closes()
        );
    }
}

impl WaitCounter for CountingWait {
    fn start(&self) -> TaskHandle {
        let _ = self.opens.fetch_add(1, Ordering::SeqCst);
        let inner = WaitCounter::start(&self.point);
        let closes = Arc::clone(&self.closes);
        TaskHandle::new(move || {
            let _ = closes.fetch_add(1, Ordering::SeqCst);
            inner.end();
        })
    }
}
