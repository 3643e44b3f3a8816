//! # Instrumentation core: install, session lifecycle, restore.
//!
//! [`install`] claims the host for one session, compiles the configuration,
//! wires the trackers into the host's entry-point slots and starts the
//! mutation watcher. The returned [`Instrumentation`] owns every patch;
//! [`Instrumentation::restore`] unwinds them to the exact pre-install
//! references and disconnects the watcher.
//!
//! Internal modules:
//! - [`registry`]: entry-point replacement bookkeeping;
//! - [`stack`]: recursion detection for self-rescheduling callbacks;
//! - [`timers`]: deferred + immediate timer families;
//! - [`net`]: promise-style and event-driven network protocols;
//! - [`resources`]: script/style load interception;
//! - [`motion`]: declarative and imperative motion plus resource readiness;
//! - [`mutation`]: tree walking and insertion watching.
//!
//! ## Restore semantics
//! Restore closes the session gate: persistent listeners stop opening new
//! handles immediately, while work that is already pending still closes when
//! it completes — quiescence remains reachable, and nothing opens after it.

mod mutation;
mod net;
mod registry;
mod resources;
mod stack;
mod timers;

pub(crate) mod motion;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::Config;
use crate::error::InstrumentError;
use crate::host::{Element, Host, MotionEventNames};
use crate::track::motion::MotionTracker;
use crate::track::mutation::MutationWatcher;
use crate::track::registry::PatchRegistry;
use crate::wait::WaitCounter;

/// Shared on/off switch for one session.
///
/// Listeners attached to long-lived objects (elements, requests) outlive a
/// restore; the gate makes their open paths inert while leaving close paths
/// untouched.
#[derive(Clone)]
pub(crate) struct SessionGate(Arc<AtomicBool>);

impl SessionGate {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub(crate) fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Installs the instrumentation on a host.
///
/// Wraps every asynchronous entry point the host exposes, attaches the
/// motion tracker to the current tree and watches for insertions. Each
/// tracked unit of work opens one handle with `wait` and closes it exactly
/// once when the work settles.
///
/// # Errors
/// - [`InstrumentError::AlreadyInstalled`] if another session owns the host;
/// - [`InstrumentError::InvalidPattern`] if a blacklist pattern does not
///   compile. Both leave the host untouched.
pub fn install(
    host: &Arc<Host>,
    wait: Arc<dyn WaitCounter>,
    config: Config,
) -> Result<Instrumentation, InstrumentError> {
    let cfg = Arc::new(config.compile()?);
    if !host.claim_instrumented() {
        return Err(InstrumentError::AlreadyInstalled);
    }

    let gate = SessionGate::new();
    let registry = PatchRegistry::new();

    timers::install(&registry, host, &wait, &cfg);
    net::install(&registry, host, &wait, &cfg, &gate);

    let names = motion::probe(host);
    let tracker = MotionTracker::new(names, Arc::clone(&wait), gate.clone(), cfg.verbose);
    tracker.install(&registry, host);

    let completion = {
        let tracker = Arc::clone(&tracker);
        Arc::new(move |element: &Arc<Element>| tracker.complete_resource(element))
            as resources::CompletionFn
    };
    resources::install(&registry, host, completion, &gate);

    let watcher = MutationWatcher::spawn(Arc::clone(&host.document), tracker);
    watcher.start();

    tracing::debug!(
        max_timeout_ms = cfg.max_timeout.as_millis() as u64,
        "instrumentation installed"
    );

    Ok(Instrumentation {
        host: Arc::clone(host),
        registry,
        watcher,
        gate,
        motion_events: names,
        restored: AtomicBool::new(false),
    })
}

/// One live instrumentation session.
pub struct Instrumentation {
    host: Arc<Host>,
    registry: PatchRegistry,
    watcher: Arc<MutationWatcher>,
    gate: SessionGate,
    motion_events: &'static MotionEventNames,
    restored: AtomicBool,
}

impl Instrumentation {
    /// Motion event names resolved for this host at install time.
    pub fn motion_events(&self) -> &'static MotionEventNames {
        self.motion_events
    }

    /// Reverses every patch and disconnects the mutation watcher.
    ///
    /// Every entry point returns to its exact pre-install reference
    /// (`Arc::ptr_eq` with the value read before [`install`]). Already
    /// pending tracked work still closes its handles when it completes; no
    /// new handles open. Calling restore twice is a no-op.
    pub fn restore(&self) {
        if self.restored.swap(true, Ordering::SeqCst) {
            return;
        }
        self.gate.close();
        self.registry.restore_all();
        self.watcher.disconnect();
        self.host.release_instrumented();
        tracing::debug!("instrumentation restored");
    }
}
