//! # Simulated event-driven host.
//!
//! The [`Host`] is the environment the instrumentation wraps: timers, network
//! entry points, a document tree with motion and resource loading. All of its
//! asynchronous behavior is driven by tokio tasks and the tokio clock, so a
//! test under `#[tokio::test(start_paused = true)]` observes fully
//! deterministic virtual time.
//!
//! Every asynchronous entry point lives in a [`Slot`]; host verbs like
//! [`Host::set_timeout`] dispatch through the current slot content, which is
//! what makes the instrumentation transparent to host code.
//!
//! Internal modules:
//! - [`slot`]: replaceable entry points;
//! - [`timers`]: deferred + immediate scheduling families;
//! - [`net`]: promise-style and event-driven request protocols;
//! - [`dom`]: document tree, mutation subscriptions, resource loading;
//! - [`motion`]: motion styles, lifecycle event names, imperative animations.

pub mod dom;
pub mod motion;
pub mod net;
pub mod slot;
pub mod timers;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::HostError;

pub use dom::{
    CreateElementFn, Document, Element, ElementId, EventDetail, EventListener, ListenerId,
    LoadState, MutationObserver, Tag,
};
pub use motion::{
    AnimateFn, AnimateOptions, Animation, AnimationListener, AnimationSignal, Iterations,
    MotionEventNames, MotionKind, MotionStyle, VendorFlavor,
};
pub use net::{
    FetchFn, FetchFuture, FetchRequest, FetchResponse, HttpRequest, Method, ReadyState,
    ReadyStateListener, RequestAbortFn, RequestInner, RequestOpenFn, RequestSendFn,
};
pub use slot::Slot;
pub use timers::{CancelFn, ScheduleFn, TimerApi, TimerCallback, TimerId};

use dom::ResourceLoader;
use net::{NetApi, RouteTable};

/// Monotonic id source shared by every host subsystem.
#[derive(Clone)]
pub(crate) struct IdSource(Arc<AtomicU64>);

impl IdSource {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU64::new(1)))
    }

    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// The host error channel: errors are logged and retained for inspection.
#[derive(Clone)]
pub(crate) struct ErrorSink {
    inner: Arc<Mutex<Vec<HostError>>>,
}

impl ErrorSink {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn report(&self, error: HostError) {
        tracing::error!(error = %error, label = error.as_label(), "host error");
        self.inner.lock().push(error);
    }

    fn take(&self) -> Vec<HostError> {
        std::mem::take(&mut *self.inner.lock())
    }
}

/// Simulated event-driven host environment.
pub struct Host {
    /// Timer entry points.
    pub timers: TimerApi,
    /// Network entry points.
    pub net: NetApi,
    /// Document tree.
    pub document: Arc<Document>,
    vendor: VendorFlavor,
    errors: ErrorSink,
    instrumented: AtomicBool,
}

impl Host {
    /// Builds a host with default capabilities.
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    /// Starts configuring a host.
    pub fn builder() -> HostBuilder {
        HostBuilder::default()
    }

    /// Schedules a deferred callback. Dispatches through the current
    /// entry point.
    pub fn set_timeout(&self, callback: TimerCallback, delay: Duration) -> TimerId {
        (self.timers.set_deferred.get())(callback, delay)
    }

    /// Cancels a deferred callback.
    pub fn clear_timeout(&self, id: TimerId) {
        (self.timers.clear_deferred.get())(id);
    }

    /// Schedules an immediate callback, if the host exposes the family.
    pub fn set_immediate(&self, callback: TimerCallback) -> Option<TimerId> {
        self.timers
            .set_immediate
            .as_ref()
            .map(|slot| (slot.get())(callback, Duration::ZERO))
    }

    /// Cancels an immediate callback. A no-op on hosts without the family.
    pub fn clear_immediate(&self, id: TimerId) {
        if let Some(slot) = &self.timers.clear_immediate {
            (slot.get())(id);
        }
    }

    /// Issues a promise-style request. Hosts without the capability settle
    /// with [`HostError::Unsupported`].
    pub fn fetch(&self, request: FetchRequest) -> FetchFuture {
        self.net.fetch(request)
    }

    /// Creates an event-driven request.
    pub fn new_request(&self) -> HttpRequest {
        self.net.new_request()
    }

    /// Whether this host emits the given motion lifecycle event name.
    pub fn supports_event(&self, name: &str) -> bool {
        self.vendor.event_names().contains(name)
    }

    /// The vendor flavor this host was built with.
    pub fn vendor(&self) -> VendorFlavor {
        self.vendor
    }

    /// Reports an error through the host error channel.
    pub fn report_error(&self, error: HostError) {
        self.errors.report(error);
    }

    /// Drains errors accumulated on the error channel.
    pub fn take_errors(&self) -> Vec<HostError> {
        self.errors.take()
    }

    /// Claims the host for one instrumentation session.
    pub(crate) fn claim_instrumented(&self) -> bool {
        !self.instrumented.swap(true, Ordering::SeqCst)
    }

    /// Releases the instrumentation claim.
    pub(crate) fn release_instrumented(&self) {
        self.instrumented.store(false, Ordering::SeqCst);
    }
}

/// Builder for [`Host`] capabilities and simulated behavior.
pub struct HostBuilder {
    vendor: VendorFlavor,
    with_fetch: bool,
    with_immediate: bool,
    network_latency: Duration,
    resource_latency: Duration,
    failing_routes: Vec<String>,
    failing_resources: Vec<String>,
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self {
            vendor: VendorFlavor::Unprefixed,
            with_fetch: true,
            with_immediate: true,
            network_latency: Duration::from_millis(10),
            resource_latency: Duration::from_millis(10),
            failing_routes: Vec::new(),
            failing_resources: Vec::new(),
        }
    }
}

impl HostBuilder {
    /// Selects the motion event naming family the host emits.
    #[must_use]
    pub fn vendor(mut self, vendor: VendorFlavor) -> Self {
        self.vendor = vendor;
        self
    }

    /// Removes the promise-style network entry point.
    #[must_use]
    pub fn without_fetch(mut self) -> Self {
        self.with_fetch = false;
        self
    }

    /// Removes the immediate timer family.
    #[must_use]
    pub fn without_immediate(mut self) -> Self {
        self.with_immediate = false;
        self
    }

    /// Latency of simulated network traffic.
    #[must_use]
    pub fn network_latency(mut self, latency: Duration) -> Self {
        self.network_latency = latency;
        self
    }

    /// Latency of simulated resource loads.
    #[must_use]
    pub fn resource_latency(mut self, latency: Duration) -> Self {
        self.resource_latency = latency;
        self
    }

    /// Makes network requests to `url` fail.
    #[must_use]
    pub fn fail_route(mut self, url: impl Into<String>) -> Self {
        self.failing_routes.push(url.into());
        self
    }

    /// Makes resource loads from `url` fail.
    #[must_use]
    pub fn fail_resource(mut self, url: impl Into<String>) -> Self {
        self.failing_resources.push(url.into());
        self
    }

    /// Builds the host.
    pub fn build(self) -> Arc<Host> {
        let ids = IdSource::new();
        let errors = ErrorSink::new();
        let routes = RouteTable::new(self.network_latency, self.failing_routes);
        let loader = ResourceLoader::new(
            self.resource_latency,
            self.failing_resources,
            errors.clone(),
        );

        Arc::new(Host {
            timers: TimerApi::new(ids.clone(), errors.clone(), self.with_immediate),
            net: NetApi::new(ids.clone(), errors.clone(), routes, self.with_fetch),
            document: Document::new(ids, self.vendor.event_names(), loader),
            vendor: self.vendor,
            errors,
            instrumented: AtomicBool::new(false),
        })
    }
}
