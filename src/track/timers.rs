//! # Timer tracker.
//!
//! Wraps both scheduling families and their cancel functions.
//!
//! ## Rules
//! - A schedule is tracked unless the call-stack guard flags recursive
//!   self-rescheduling, or (deferred family only) the requested delay reaches
//!   the `max_timeout` threshold — delays at or above it are background
//!   polling, exempt from tracking.
//! - The handle opens strictly before the host's real schedule function runs
//!   and is stored under the returned timer id.
//! - The user callback is wrapped so the handle closes on every exit path —
//!   normal return and error alike — and the ambient chain is restored; a
//!   callback error still reaches the host error channel after release.
//! - Cancel closes any live handle for the id, then always delegates to the
//!   real cancel function; cancelling an untracked or completed id is a
//!   tracking-layer no-op.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::config::CompiledConfig;
use crate::host::{CancelFn, Host, ScheduleFn, TimerCallback, TimerId};
use crate::pending::{CloseOnDrop, PendingSet};
use crate::track::registry::PatchRegistry;
use crate::track::stack::{CallStackGuard, callback_id};
use crate::wait::WaitCounter;

pub(crate) fn install(
    registry: &PatchRegistry,
    host: &Host,
    wait: &Arc<dyn WaitCounter>,
    cfg: &Arc<CompiledConfig>,
) {
    let guard = Arc::new(CallStackGuard::new());
    let pending = PendingSet::new("timer", cfg.verbose);

    registry.patch("set_deferred", &host.timers.set_deferred, {
        let guard = Arc::clone(&guard);
        let pending = Arc::clone(&pending);
        let wait = Arc::clone(wait);
        let threshold = Some(cfg.max_timeout);
        move |orig| wrap_schedule(orig, guard, pending, wait, threshold)
    });
    registry.patch("clear_deferred", &host.timers.clear_deferred, {
        let pending = Arc::clone(&pending);
        move |orig| wrap_cancel(orig, pending)
    });

    // The immediate family has no delay to filter on.
    registry.patch_opt("set_immediate", host.timers.set_immediate.as_ref(), {
        let guard = Arc::clone(&guard);
        let pending = Arc::clone(&pending);
        let wait = Arc::clone(wait);
        move |orig| wrap_schedule(orig, guard, pending, wait, None)
    });
    registry.patch_opt("clear_immediate", host.timers.clear_immediate.as_ref(), {
        let pending = Arc::clone(&pending);
        move |orig| wrap_cancel(orig, pending)
    });
}

fn wrap_schedule(
    orig: Arc<ScheduleFn>,
    guard: Arc<CallStackGuard>,
    pending: Arc<PendingSet<TimerId>>,
    wait: Arc<dyn WaitCounter>,
    threshold: Option<Duration>,
) -> Arc<ScheduleFn> {
    Arc::new(move |callback: TimerCallback, delay: Duration| -> TimerId {
        let ambient = guard.ambient();
        let identity = callback_id(&callback);
        let recursive = ambient.contains(&identity);
        let within = threshold.is_none_or(|max| delay < max);
        let tracked = within && !recursive;
        if !tracked {
            tracing::trace!(
                recursive,
                delay_ms = delay.as_millis() as u64,
                "schedule excluded from tracking"
            );
        }

        // The chain the callback will run under: inherited, plus itself for
        // tracked links. Recursive links inherit unchanged — the identity is
        // already present, which keeps deeper reschedules recognized.
        let chain = {
            let mut chain = ambient;
            if !recursive {
                chain.push(identity);
            }
            chain
        };

        let key = Arc::new(OnceLock::<TimerId>::new());
        let wrapped: TimerCallback = {
            let guard = Arc::clone(&guard);
            let pending = Arc::clone(&pending);
            let key = Arc::clone(&key);
            Arc::new(move || {
                let _chain = guard.enter(chain.clone());
                let _close = CloseOnDrop::new(Arc::clone(&pending), key.get().copied());
                callback()
            })
        };

        // Open before the real schedule dispatches; the pending entry is
        // registered under the returned id before any later turn can fire
        // the timer.
        let handle = if tracked { Some(wait.start()) } else { None };
        let timer = orig(wrapped, delay);
        if let Some(handle) = handle {
            if pending.register(timer, handle) {
                let _ = key.set(timer);
            }
        }
        timer
    })
}

fn wrap_cancel(orig: Arc<CancelFn>, pending: Arc<PendingSet<TimerId>>) -> Arc<CancelFn> {
    Arc::new(move |id: TimerId| {
        let _ = pending.close(id);
        orig(id);
    })
}
