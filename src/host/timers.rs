//! # Host timer families.
//!
//! Two scheduling families, matching the usual host pairing:
//! - **deferred**: run the callback after a requested delay;
//! - **immediate**: run the callback as soon as possible on a later turn
//!   (optional capability — some hosts do not expose it).
//!
//! Each family is a pair of [`Slot`]s (`schedule`, `cancel`) so the
//! instrumentation can wrap them independently. The native implementations
//! spawn a tokio task per timer, guarded by a per-timer
//! [`CancellationToken`]; a callback error is reported to the host error
//! channel, never panicked through the runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::HostError;
use crate::host::slot::Slot;
use crate::host::{ErrorSink, IdSource};

/// Identifier returned by the schedule entry points.
pub type TimerId = u64;

/// A scheduled unit of work.
///
/// Callbacks return `Result` so failures reach the host's error channel; the
/// tracking layer guarantees a failing callback still releases its pending
/// count first.
pub type TimerCallback = Arc<dyn Fn() -> Result<(), HostError> + Send + Sync>;

/// Schedule entry point. The immediate family receives `Duration::ZERO` and
/// ignores it.
pub type ScheduleFn = dyn Fn(TimerCallback, Duration) -> TimerId + Send + Sync;

/// Cancel entry point. Unknown ids are tolerated.
pub type CancelFn = dyn Fn(TimerId) + Send + Sync;

/// Timer entry points exposed by a host.
pub struct TimerApi {
    /// Deferred family: run after a delay.
    pub set_deferred: Arc<Slot<ScheduleFn>>,
    /// Cancel a deferred timer.
    pub clear_deferred: Arc<Slot<CancelFn>>,
    /// Immediate family: run on a later turn, as soon as possible.
    /// `None` when the host does not expose it.
    pub set_immediate: Option<Arc<Slot<ScheduleFn>>>,
    /// Cancel an immediate timer.
    pub clear_immediate: Option<Arc<Slot<CancelFn>>>,
}

impl TimerApi {
    pub(crate) fn new(ids: IdSource, errors: ErrorSink, with_immediate: bool) -> Self {
        let wheel = Arc::new(TimerWheel {
            ids,
            errors,
            active: Mutex::new(HashMap::new()),
        });

        let set_deferred = Slot::new(native_schedule(Arc::clone(&wheel), false));
        let clear_deferred = Slot::new(native_cancel(Arc::clone(&wheel)));
        let (set_immediate, clear_immediate) = if with_immediate {
            (
                Some(Slot::new(native_schedule(Arc::clone(&wheel), true))),
                Some(Slot::new(native_cancel(wheel))),
            )
        } else {
            (None, None)
        };

        Self {
            set_deferred,
            clear_deferred,
            set_immediate,
            clear_immediate,
        }
    }

    /// Whether the host exposes the immediate family.
    pub fn has_immediate(&self) -> bool {
        self.set_immediate.is_some()
    }
}

/// Shared native timer state.
struct TimerWheel {
    ids: IdSource,
    errors: ErrorSink,
    active: Mutex<HashMap<TimerId, CancellationToken>>,
}

fn native_schedule(wheel: Arc<TimerWheel>, immediate: bool) -> Arc<ScheduleFn> {
    Arc::new(move |callback: TimerCallback, delay: Duration| -> TimerId {
        let id = wheel.ids.next();
        let token = CancellationToken::new();
        let _ = wheel.active.lock().insert(id, token.clone());

        let wheel = Arc::clone(&wheel);
        let _task = tokio::spawn(async move {
            let fire = async {
                if immediate {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(delay).await;
                }
            };
            tokio::select! {
                () = token.cancelled() => {}
                () = fire => {
                    let _ = wheel.active.lock().remove(&id);
                    if let Err(err) = callback() {
                        wheel.errors.report(err);
                    }
                }
            }
        });
        id
    })
}

fn native_cancel(wheel: Arc<TimerWheel>) -> Arc<CancelFn> {
    Arc::new(move |id: TimerId| {
        if let Some(token) = wheel.active.lock().remove(&id) {
            token.cancel();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Host;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_deferred_fires_after_delay() {
        let host = Host::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let cb: TimerCallback = {
            let fired = Arc::clone(&fired);
            Arc::new(move || {
                let _ = fired.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        let _id = host.set_timeout(cb, Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(49)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let host = Host::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let cb: TimerCallback = {
            let fired = Arc::clone(&fired);
            Arc::new(move || {
                let _ = fired.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        let id = host.set_timeout(cb, Duration::from_millis(50));
        host.clear_timeout(id);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_unknown_id_is_tolerated() {
        let host = Host::new();
        host.clear_timeout(991);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_error_reaches_error_channel() {
        let host = Host::new();
        let cb: TimerCallback = Arc::new(|| Err(HostError::callback("boom")));
        let _id = host.set_timeout(cb, Duration::from_millis(1));

        tokio::time::sleep(Duration::from_millis(2)).await;
        let errors = host.take_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].as_label(), "callback_failed");
    }
}
