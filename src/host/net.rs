//! # Host network entry points.
//!
//! Two request protocols, matching the usual host pairing:
//! - **promise-style** ([`FetchFn`]): one call returns a future that settles
//!   with the response or an error (optional capability);
//! - **event-driven** ([`HttpRequest`]): configure with `open`, dispatch with
//!   `send`, observe [`ReadyState`] transitions, optionally `abort`.
//!
//! The `open`/`send`/`abort` steps dispatch through host-level [`Slot`]s that
//! every request instance shares, so wrapping a slot intercepts instances
//! created before and after the wrap alike.
//!
//! Route behavior (latency, failing URLs) is configured on the
//! [`HostBuilder`](crate::host::HostBuilder); the default is a 200 response
//! after a fixed latency.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::HostError;
use crate::host::slot::Slot;
use crate::host::{ErrorSink, IdSource};

/// Request method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
}

impl Method {
    /// Canonical upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Promise-style request.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
        }
    }

    /// Shorthand for a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }
}

/// Promise-style response.
#[derive(Clone, Copy, Debug)]
pub struct FetchResponse {
    pub status: u16,
}

/// Future returned by the promise-style entry point.
pub type FetchFuture = BoxFuture<'static, Result<FetchResponse, HostError>>;

/// Promise-style network entry point.
pub type FetchFn = dyn Fn(FetchRequest) -> FetchFuture + Send + Sync;

/// Ready state of an event-driven request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    /// Created, not configured.
    Unsent,
    /// Configured via `open`.
    Opened,
    /// Dispatched; the initiating state.
    Loading,
    /// Terminal: responded, failed or aborted.
    Done,
}

/// Listener invoked on every ready-state transition.
pub type ReadyStateListener = Arc<dyn Fn(ReadyState) + Send + Sync>;

/// Configuration entry point of the event-driven protocol.
pub type RequestOpenFn = dyn Fn(&Arc<RequestInner>, Method, &str) + Send + Sync;

/// Dispatch entry point of the event-driven protocol.
pub type RequestSendFn = dyn Fn(&Arc<RequestInner>) + Send + Sync;

/// Abort entry point of the event-driven protocol.
pub type RequestAbortFn = dyn Fn(&Arc<RequestInner>) + Send + Sync;

/// Network entry points exposed by a host.
pub struct NetApi {
    /// Promise-style request. `None` when the host does not expose it.
    pub fetch: Option<Arc<Slot<FetchFn>>>,
    /// Event-driven request configuration step.
    pub request_open: Arc<Slot<RequestOpenFn>>,
    /// Event-driven request dispatch step.
    pub request_send: Arc<Slot<RequestSendFn>>,
    /// Event-driven request abort step.
    pub request_abort: Arc<Slot<RequestAbortFn>>,
    ids: IdSource,
}

impl NetApi {
    pub(crate) fn new(
        ids: IdSource,
        errors: ErrorSink,
        routes: Arc<RouteTable>,
        with_fetch: bool,
    ) -> Self {
        let fetch = with_fetch.then(|| Slot::new(native_fetch(Arc::clone(&routes))));
        Self {
            fetch,
            request_open: Slot::new(native_open()),
            request_send: Slot::new(native_send(routes, errors)),
            request_abort: Slot::new(native_abort()),
            ids,
        }
    }

    /// Whether the host exposes the promise-style entry point.
    pub fn has_fetch(&self) -> bool {
        self.fetch.is_some()
    }

    /// Issues a promise-style request through the current entry point.
    pub fn fetch(&self, request: FetchRequest) -> FetchFuture {
        match &self.fetch {
            Some(slot) => (slot.get())(request),
            None => {
                async { Err(HostError::Unsupported { name: "fetch" }) }.boxed()
            }
        }
    }

    /// Creates a fresh event-driven request bound to this host's slots.
    pub fn new_request(&self) -> HttpRequest {
        HttpRequest {
            inner: Arc::new(RequestInner {
                id: self.ids.next(),
                open: Arc::clone(&self.request_open),
                send: Arc::clone(&self.request_send),
                abort: Arc::clone(&self.request_abort),
                state: Mutex::new(ReadyState::Unsent),
                method: Mutex::new(None),
                url: Mutex::new(None),
                status: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                aborted: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }
}

/// Configured latency and failure set for simulated traffic.
pub(crate) struct RouteTable {
    latency: Mutex<Duration>,
    failing: Mutex<HashSet<String>>,
}

impl RouteTable {
    pub(crate) fn new(latency: Duration, failing: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            latency: Mutex::new(latency),
            failing: Mutex::new(failing.into_iter().collect()),
        })
    }

    fn latency(&self) -> Duration {
        *self.latency.lock()
    }

    fn is_failing(&self, url: &str) -> bool {
        self.failing.lock().contains(url)
    }
}

/// Event-driven request object.
///
/// All verbs dispatch through the host's slots; a wrapped slot therefore
/// observes every instance.
pub struct HttpRequest {
    inner: Arc<RequestInner>,
}

impl HttpRequest {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Configures method and target; transitions to [`ReadyState::Opened`].
    pub fn open(&self, method: Method, url: &str) {
        let f = self.inner.open.get();
        f(&self.inner, method, url);
    }

    /// Dispatches the request; transitions to [`ReadyState::Loading`] and,
    /// once the route settles, to [`ReadyState::Done`].
    pub fn send(&self) {
        let f = self.inner.send.get();
        f(&self.inner);
    }

    /// Aborts an in-flight request; transitions to [`ReadyState::Done`].
    pub fn abort(&self) {
        let f = self.inner.abort.get();
        f(&self.inner);
    }

    pub fn state(&self) -> ReadyState {
        self.inner.state()
    }

    /// Response status, once done. Aborted and failed requests report 0.
    pub fn status(&self) -> Option<u16> {
        *self.inner.status.lock()
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Registers a ready-state listener.
    pub fn on_ready_state(&self, listener: ReadyStateListener) {
        self.inner.on_ready_state(listener);
    }
}

/// Shared state of one event-driven request.
pub struct RequestInner {
    id: u64,
    open: Arc<Slot<RequestOpenFn>>,
    send: Arc<Slot<RequestSendFn>>,
    abort: Arc<Slot<RequestAbortFn>>,
    state: Mutex<ReadyState>,
    method: Mutex<Option<Method>>,
    url: Mutex<Option<String>>,
    status: Mutex<Option<u16>>,
    listeners: Mutex<Vec<ReadyStateListener>>,
    aborted: AtomicBool,
    cancel: CancellationToken,
}

impl RequestInner {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ReadyState {
        *self.state.lock()
    }

    pub fn url(&self) -> Option<String> {
        self.url.lock().clone()
    }

    pub fn method(&self) -> Option<Method> {
        *self.method.lock()
    }

    /// Registers a ready-state listener.
    pub fn on_ready_state(&self, listener: ReadyStateListener) {
        self.listeners.lock().push(listener);
    }

    fn set_state(&self, next: ReadyState) {
        *self.state.lock() = next;
        let listeners: Vec<ReadyStateListener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(next);
        }
    }
}

fn native_open() -> Arc<RequestOpenFn> {
    Arc::new(|request: &Arc<RequestInner>, method: Method, url: &str| {
        *request.method.lock() = Some(method);
        *request.url.lock() = Some(url.to_string());
        request.set_state(ReadyState::Opened);
    })
}

fn native_send(routes: Arc<RouteTable>, errors: ErrorSink) -> Arc<RequestSendFn> {
    Arc::new(move |request: &Arc<RequestInner>| {
        if request.state() != ReadyState::Opened {
            return;
        }
        request.set_state(ReadyState::Loading);

        let request = Arc::clone(request);
        let routes = Arc::clone(&routes);
        let errors = errors.clone();
        let _task = tokio::spawn(async move {
            let token = request.cancel.clone();
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(routes.latency()) => {
                    let url = request.url().unwrap_or_default();
                    if routes.is_failing(&url) {
                        *request.status.lock() = Some(0);
                        errors.report(HostError::Network { url });
                    } else {
                        *request.status.lock() = Some(200);
                    }
                    request.set_state(ReadyState::Done);
                }
            }
        });
    })
}

fn native_abort() -> Arc<RequestAbortFn> {
    Arc::new(|request: &Arc<RequestInner>| {
        request.cancel.cancel();
        if request.state() != ReadyState::Done {
            request.aborted.store(true, Ordering::SeqCst);
            *request.status.lock() = Some(0);
            request.set_state(ReadyState::Done);
        }
    })
}

fn native_fetch(routes: Arc<RouteTable>) -> Arc<FetchFn> {
    Arc::new(move |request: FetchRequest| -> FetchFuture {
        let routes = Arc::clone(&routes);
        async move {
            tokio::time::sleep(routes.latency()).await;
            if routes.is_failing(&request.url) {
                Err(HostError::Network { url: request.url })
            } else {
                Ok(FetchResponse { status: 200 })
            }
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Host;

    #[tokio::test(start_paused = true)]
    async fn test_fetch_responds_after_latency() {
        let host = Host::new();
        let response = host
            .fetch(FetchRequest::get("http://api.example/items"))
            .await
            .expect("route responds");
        assert_eq!(response.status, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_for_configured_route() {
        let host = Host::builder().fail_route("http://down.example/").build();
        let err = host
            .fetch(FetchRequest::get("http://down.example/"))
            .await
            .err()
            .expect("route fails");
        assert_eq!(err.as_label(), "network_failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_state_transitions() {
        let host = Host::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let request = host.new_request();
        request.on_ready_state({
            let seen = Arc::clone(&seen);
            Arc::new(move |state| seen.lock().push(state))
        });

        request.open(Method::Get, "http://api.example/items");
        request.send();
        assert_eq!(request.state(), ReadyState::Loading);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(request.state(), ReadyState::Done);
        assert_eq!(request.status(), Some(200));
        assert_eq!(
            *seen.lock(),
            vec![ReadyState::Opened, ReadyState::Loading, ReadyState::Done]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_reaches_done_with_zero_status() {
        let host = Host::new();
        let request = host.new_request();
        request.open(Method::Get, "http://api.example/slow");
        request.send();

        request.abort();
        assert_eq!(request.state(), ReadyState::Done);
        assert_eq!(request.status(), Some(0));
        assert!(request.is_aborted());

        // The route completing later must not resurrect the request.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(request.status(), Some(0));
    }
}
