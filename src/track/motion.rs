//! # Motion tracker.
//!
//! Tracks three settlement sources on elements the watcher hands it:
//!
//! - **Declarative motion**: lifecycle events under the probed vendor
//!   family. A start/run event on an element not already marked animating
//!   reads the computed motion style; unbounded iteration counts are never
//!   tracked (they cannot settle). End/cancel events close and unmark.
//! - **Imperative motion**: the wrapped `animate` entry point; animations
//!   with a finite iteration count and nonzero duration open a handle closed
//!   once by the finish-or-cancel signal.
//! - **Script/style readiness**: intercepted resource elements that are
//!   still loading when observed hold a handle until the resource tracker's
//!   completion callback fires; already-settled or inline elements are
//!   accounted with an open-and-immediately-deferred-close.
//!
//! The vendor family is probed once at install time: the first family the
//! host reports support for wins, defaulting to the unprefixed names.

use std::sync::{Arc, Weak};

use crate::host::motion::{MOZ, MotionEventNames, OPERA, UNPREFIXED, WEBKIT};
use crate::host::{AnimateFn, AnimateOptions, Animation, Element, ElementId, Host, LoadState};
use crate::pending::PendingSet;
use crate::track::SessionGate;
use crate::track::registry::PatchRegistry;
use crate::wait::WaitCounter;

/// Candidate families in probe order.
static CANDIDATES: [&MotionEventNames; 4] = [&UNPREFIXED, &WEBKIT, &MOZ, &OPERA];

/// Resolves the motion event names the host actually emits.
pub(crate) fn probe(host: &Host) -> &'static MotionEventNames {
    for family in CANDIDATES {
        if host.supports_event(family.animation_start) {
            return family;
        }
    }
    &UNPREFIXED
}

pub(crate) struct MotionTracker {
    self_ref: Weak<MotionTracker>,
    names: &'static MotionEventNames,
    wait: Arc<dyn WaitCounter>,
    gate: SessionGate,
    motion_pending: Arc<PendingSet<ElementId>>,
    load_pending: Arc<PendingSet<ElementId>>,
    animation_pending: Arc<PendingSet<u64>>,
}

impl MotionTracker {
    pub(crate) fn new(
        names: &'static MotionEventNames,
        wait: Arc<dyn WaitCounter>,
        gate: SessionGate,
        verbose: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            names,
            wait,
            gate,
            motion_pending: PendingSet::new("motion", verbose),
            load_pending: PendingSet::new("resource", verbose),
            animation_pending: PendingSet::new("animation", verbose),
        })
    }

    /// Wraps the imperative `animate` entry point.
    pub(crate) fn install(&self, registry: &PatchRegistry, host: &Host) {
        let Some(tracker) = self.self_ref.upgrade() else {
            return;
        };
        registry.patch("animate", &host.document.animate, move |orig| {
            Arc::new(
                move |element: &Arc<Element>, options: AnimateOptions| -> Arc<Animation> {
                    let animation = orig(element, options);
                    tracker.track_animation(&animation);
                    animation
                },
            ) as Arc<AnimateFn>
        });
    }

    fn track_animation(&self, animation: &Arc<Animation>) {
        let options = animation.options();
        if !self.gate.is_active() {
            return;
        }
        if !options.iterations.is_finite() || options.duration.is_zero() {
            tracing::trace!(animation = animation.id(), "unbounded animation; not tracked");
            return;
        }
        if self.animation_pending.open(animation.id(), &*self.wait) {
            let pending = Arc::clone(&self.animation_pending);
            let id = animation.id();
            animation.on_done(Arc::new(move |_signal| {
                let _ = pending.close(id);
            }));
        }
    }

    /// Attaches motion listeners and the readiness check to one element.
    /// Called exactly once per element by the mutation watcher.
    pub(crate) fn attach(&self, element: &Arc<Element>) {
        let names = self.names;

        let on_start: crate::host::EventListener = {
            let tracker = self.self_ref.clone();
            Arc::new(move |event| {
                if let Some(tracker) = tracker.upgrade() {
                    tracker.motion_started(&event.target);
                }
            })
        };
        for name in [
            names.transition_run,
            names.transition_start,
            names.animation_start,
        ] {
            let _ = element.add_listener(name, false, Arc::clone(&on_start));
        }

        let on_end: crate::host::EventListener = {
            let tracker = self.self_ref.clone();
            Arc::new(move |event| {
                if let Some(tracker) = tracker.upgrade() {
                    tracker.motion_ended(&event.target);
                }
            })
        };
        for name in [
            names.transition_end,
            names.transition_cancel,
            names.animation_end,
        ] {
            let _ = element.add_listener(name, false, Arc::clone(&on_end));
        }

        self.observe_resource(element);
    }

    fn motion_started(&self, element: &Arc<Element>) {
        if !self.gate.is_active() {
            return;
        }
        let Some(style) = element.motion_style() else {
            return;
        };
        if !style.iterations.is_finite() {
            tracing::trace!(element = element.id(), "unbounded motion; not tracked");
            return;
        }
        if element.set_animating(true) {
            // A transition dispatches both run and start; only the first
            // marks and opens.
            return;
        }
        let _ = self.motion_pending.open(element.id(), &*self.wait);
    }

    fn motion_ended(&self, element: &Arc<Element>) {
        if element.set_animating(false) {
            let _ = self.motion_pending.close(element.id());
        }
    }

    /// Accounts for an intercepted resource element's readiness.
    fn observe_resource(&self, element: &Arc<Element>) {
        if !element.is_intercepted() || !self.gate.is_active() {
            return;
        }
        match element.load_state() {
            LoadState::Pending => {
                let _ = self.load_pending.open(element.id(), &*self.wait);
            }
            LoadState::Inline | LoadState::Loaded | LoadState::Failed => {
                // Nothing outstanding: accounted for, never blocking.
                self.wait.start().end_deferred();
            }
        }
    }

    /// Completion callback handed to the resource tracker.
    pub(crate) fn complete_resource(&self, element: &Arc<Element>) {
        let _ = self.load_pending.close(element.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VendorFlavor;

    #[test]
    fn test_probe_prefers_host_family() {
        let host = Host::builder().vendor(VendorFlavor::Webkit).build();
        assert_eq!(probe(&host), &WEBKIT);

        let host = Host::builder().vendor(VendorFlavor::Opera).build();
        assert_eq!(probe(&host), &OPERA);
    }

    #[test]
    fn test_probe_defaults_to_unprefixed() {
        let host = Host::new();
        assert_eq!(probe(&host), &UNPREFIXED);
    }
}
