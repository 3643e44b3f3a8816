//! # Visual motion: styles, lifecycle events, imperative animations.
//!
//! Motion reaches the instrumentation through three channels:
//! - declarative transitions/animations announce themselves via lifecycle
//!   events dispatched on the element, under the host's (possibly
//!   vendor-prefixed) event names;
//! - the imperative `animate` entry point produces an [`Animation`] object
//!   with a one-shot finish-or-cancel signal;
//! - an element's computed [`MotionStyle`] carries the iteration count that
//!   decides whether the motion can settle at all.
//!
//! The compositor stand-in ([`Document::start_motion`]) dispatches the start
//! events synchronously and the end event after the style's active duration,
//! driven by the tokio clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::host::IdSource;
use crate::host::dom::{Document, Element};

/// Iteration count of a declarative or imperative motion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Iterations {
    /// Repeat a fixed number of times.
    Count(f64),
    /// Repeat forever; such motion never settles.
    Infinite,
}

impl Iterations {
    /// Whether the motion runs a bounded number of times.
    pub fn is_finite(self) -> bool {
        match self {
            Iterations::Count(n) => n.is_finite(),
            Iterations::Infinite => false,
        }
    }
}

/// Computed motion style of an element.
#[derive(Clone, Copy, Debug)]
pub struct MotionStyle {
    /// Duration of one iteration.
    pub duration: Duration,
    /// Iteration count.
    pub iterations: Iterations,
}

impl MotionStyle {
    pub fn new(duration: Duration, iterations: Iterations) -> Self {
        Self {
            duration,
            iterations,
        }
    }

    /// Total active duration, `None` for unbounded motion.
    pub fn active_duration(&self) -> Option<Duration> {
        match self.iterations {
            Iterations::Count(n) if n.is_finite() => Some(self.duration.mul_f64(n.max(0.0))),
            _ => None,
        }
    }
}

/// Kind of declarative motion driven by the compositor stand-in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionKind {
    Transition,
    Animation,
}

/// Resolved motion lifecycle event names for one vendor family.
#[derive(Debug, PartialEq, Eq)]
pub struct MotionEventNames {
    pub transition_run: &'static str,
    pub transition_start: &'static str,
    pub transition_end: &'static str,
    pub transition_cancel: &'static str,
    pub animation_start: &'static str,
    pub animation_end: &'static str,
}

impl MotionEventNames {
    /// Whether `name` belongs to this family.
    pub fn contains(&self, name: &str) -> bool {
        name == self.transition_run
            || name == self.transition_start
            || name == self.transition_end
            || name == self.transition_cancel
            || name == self.animation_start
            || name == self.animation_end
    }
}

/// Standard event names.
pub static UNPREFIXED: MotionEventNames = MotionEventNames {
    transition_run: "transitionrun",
    transition_start: "transitionstart",
    transition_end: "transitionend",
    transition_cancel: "transitioncancel",
    animation_start: "animationstart",
    animation_end: "animationend",
};

/// WebKit-prefixed event names.
pub static WEBKIT: MotionEventNames = MotionEventNames {
    transition_run: "webkitTransitionRun",
    transition_start: "webkitTransitionStart",
    transition_end: "webkitTransitionEnd",
    transition_cancel: "webkitTransitionCancel",
    animation_start: "webkitAnimationStart",
    animation_end: "webkitAnimationEnd",
};

/// Mozilla-prefixed event names.
pub static MOZ: MotionEventNames = MotionEventNames {
    transition_run: "mozTransitionRun",
    transition_start: "mozTransitionStart",
    transition_end: "mozTransitionEnd",
    transition_cancel: "mozTransitionCancel",
    animation_start: "mozAnimationStart",
    animation_end: "mozAnimationEnd",
};

/// Opera-prefixed event names.
pub static OPERA: MotionEventNames = MotionEventNames {
    transition_run: "oTransitionRun",
    transition_start: "oTransitionStart",
    transition_end: "oTransitionEnd",
    transition_cancel: "oTransitionCancel",
    animation_start: "oAnimationStart",
    animation_end: "oAnimationEnd",
};

/// Event naming family a host emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VendorFlavor {
    Unprefixed,
    Webkit,
    Moz,
    Opera,
}

impl VendorFlavor {
    /// Event names this flavor emits.
    pub fn event_names(self) -> &'static MotionEventNames {
        match self {
            VendorFlavor::Unprefixed => &UNPREFIXED,
            VendorFlavor::Webkit => &WEBKIT,
            VendorFlavor::Moz => &MOZ,
            VendorFlavor::Opera => &OPERA,
        }
    }
}

/// Options for the imperative `animate` entry point.
#[derive(Clone, Copy, Debug)]
pub struct AnimateOptions {
    pub duration: Duration,
    pub iterations: Iterations,
}

/// One-shot terminal signal of an [`Animation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnimationSignal {
    Finish,
    Cancel,
}

/// Listener for the terminal signal.
pub type AnimationListener = Arc<dyn Fn(AnimationSignal) + Send + Sync>;

/// Imperative animation produced by the `animate` entry point.
///
/// Settles exactly once: [`AnimationSignal::Finish`] after the active
/// duration, or [`AnimationSignal::Cancel`] on [`Animation::cancel`].
/// Unbounded animations never finish on their own.
pub struct Animation {
    id: u64,
    options: AnimateOptions,
    settled: Mutex<Option<AnimationSignal>>,
    has_settled: AtomicBool,
    listeners: Mutex<Vec<AnimationListener>>,
    cancel: CancellationToken,
}

impl Animation {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn options(&self) -> AnimateOptions {
        self.options
    }

    pub fn is_settled(&self) -> bool {
        self.has_settled.load(Ordering::SeqCst)
    }

    /// Requests cancellation; the terminal signal arrives asynchronously.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Registers a terminal-signal listener. A listener registered after the
    /// animation settled is invoked immediately with the stored signal.
    pub fn on_done(&self, listener: AnimationListener) {
        let settled = *self.settled.lock();
        match settled {
            Some(signal) => listener(signal),
            None => self.listeners.lock().push(listener),
        }
    }

    fn settle(&self, signal: AnimationSignal) {
        if self.has_settled.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.settled.lock() = Some(signal);
        let listeners: Vec<AnimationListener> = std::mem::take(&mut *self.listeners.lock());
        for listener in listeners {
            listener(signal);
        }
    }
}

/// Imperative animation entry point.
pub type AnimateFn = dyn Fn(&Arc<Element>, AnimateOptions) -> Arc<Animation> + Send + Sync;

pub(crate) fn native_animate(ids: IdSource) -> Arc<AnimateFn> {
    Arc::new(move |_element: &Arc<Element>, options: AnimateOptions| -> Arc<Animation> {
        let animation = Arc::new(Animation {
            id: ids.next(),
            options,
            settled: Mutex::new(None),
            has_settled: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        });

        let driver = Arc::clone(&animation);
        let _task = tokio::spawn(async move {
            let style = MotionStyle::new(driver.options.duration, driver.options.iterations);
            let active = async {
                match style.active_duration() {
                    Some(total) => tokio::time::sleep(total).await,
                    None => future::pending::<()>().await,
                }
            };
            tokio::select! {
                () = driver.cancel.cancelled() => driver.settle(AnimationSignal::Cancel),
                () = active => driver.settle(AnimationSignal::Finish),
            }
        });

        animation
    })
}

impl Document {
    /// Starts declarative motion on an element: dispatches the start events
    /// synchronously and, for bounded motion, the end event after the active
    /// duration. Unbounded motion dispatches the start events only.
    pub fn start_motion(&self, element: &Arc<Element>, kind: MotionKind) {
        let Some(style) = element.motion_style() else {
            return;
        };
        let names = self.event_names();
        match kind {
            MotionKind::Transition => {
                element.dispatch(names.transition_run);
                element.dispatch(names.transition_start);
            }
            MotionKind::Animation => element.dispatch(names.animation_start),
        }

        let token = CancellationToken::new();
        self.track_motion(element.id(), kind, token.clone());

        if let Some(total) = style.active_duration() {
            let element = Arc::clone(element);
            let doc_motions = self.motions_handle();
            let _task = tokio::spawn(async move {
                tokio::select! {
                    () = token.cancelled() => {}
                    () = tokio::time::sleep(total) => {
                        let _ = doc_motions.lock().remove(&element.id());
                        match kind {
                            MotionKind::Transition => element.dispatch(names.transition_end),
                            MotionKind::Animation => element.dispatch(names.animation_end),
                        }
                    }
                }
            });
        }
    }

    /// Cancels in-flight declarative motion. Transitions dispatch the cancel
    /// event; animations are simply stopped.
    pub fn cancel_motion(&self, element: &Arc<Element>) {
        let motions = self.motions_handle();
        let removed = motions.lock().remove(&element.id());
        if let Some((kind, token)) = removed {
            token.cancel();
            if kind == MotionKind::Transition {
                element.dispatch(self.event_names().transition_cancel);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infinite_iterations_have_no_active_duration() {
        let style = MotionStyle::new(Duration::from_millis(10), Iterations::Infinite);
        assert!(style.active_duration().is_none());
        assert!(!style.iterations.is_finite());

        let style = MotionStyle::new(Duration::from_millis(10), Iterations::Count(f64::INFINITY));
        assert!(style.active_duration().is_none());
    }

    #[test]
    fn test_active_duration_multiplies_iterations() {
        let style = MotionStyle::new(Duration::from_millis(10), Iterations::Count(3.0));
        assert_eq!(style.active_duration(), Some(Duration::from_millis(30)));
    }

    #[test]
    fn test_vendor_families_are_distinct() {
        assert!(UNPREFIXED.contains("animationstart"));
        assert!(!UNPREFIXED.contains("webkitAnimationStart"));
        assert!(WEBKIT.contains("webkitAnimationStart"));
        assert_eq!(VendorFlavor::Moz.event_names(), &MOZ);
    }
}
