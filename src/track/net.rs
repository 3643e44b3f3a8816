//! # Network tracker.
//!
//! Two sub-protocols share one pending set:
//!
//! - **Promise-style**: the wrapper checks the blacklist before issuing;
//!   non-blacklisted calls open a handle up front and wrap the returned
//!   future so the handle closes exactly once when it settles — fulfilled,
//!   rejected, or dropped before completion.
//! - **Event-driven**: the `open` configuration step is intercepted to
//!   extract the target and method; non-blacklisted instances get a
//!   completion listener that opens a handle on the initiating
//!   ([`ReadyState::Loading`]) transition and closes it on the terminal
//!   ([`ReadyState::Done`]) one. The `abort` step closes any live handle
//!   before delegating to the real abort. Each instance opens at most one
//!   handle over its lifetime, even if reused.

use std::collections::HashSet;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;

use crate::config::CompiledConfig;
use crate::host::{
    FetchFn, FetchFuture, FetchRequest, Host, Method, ReadyState, RequestAbortFn, RequestInner,
    RequestOpenFn,
};
use crate::pending::PendingSet;
use crate::track::SessionGate;
use crate::track::registry::PatchRegistry;
use crate::wait::{EndOnDrop, WaitCounter};

pub(crate) fn install(
    registry: &PatchRegistry,
    host: &Host,
    wait: &Arc<dyn WaitCounter>,
    cfg: &Arc<CompiledConfig>,
    gate: &SessionGate,
) {
    let pending = PendingSet::new("request", cfg.verbose);

    registry.patch_opt("fetch", host.net.fetch.as_ref(), {
        let wait = Arc::clone(wait);
        let cfg = Arc::clone(cfg);
        move |orig| wrap_fetch(orig, wait, cfg)
    });

    // Requests the listener was attached to / that already consumed their
    // one handle.
    let listened: Arc<Mutex<HashSet<u64>>> = Arc::new(Mutex::new(HashSet::new()));
    let opened: Arc<Mutex<HashSet<u64>>> = Arc::new(Mutex::new(HashSet::new()));

    registry.patch("request_open", &host.net.request_open, {
        let pending = Arc::clone(&pending);
        let wait = Arc::clone(wait);
        let cfg = Arc::clone(cfg);
        let gate = gate.clone();
        move |orig| {
            Arc::new(move |request: &Arc<RequestInner>, method: Method, url: &str| {
                orig(request, method, url);
                if !gate.is_active() || cfg.is_blacklisted(url, method) {
                    return;
                }
                if !listened.lock().insert(request.id()) {
                    return;
                }

                let pending = Arc::clone(&pending);
                let wait = Arc::clone(&wait);
                let opened = Arc::clone(&opened);
                let gate = gate.clone();
                let id = request.id();
                request.on_ready_state(Arc::new(move |state| match state {
                    ReadyState::Loading => {
                        if gate.is_active() && opened.lock().insert(id) {
                            let _ = pending.open(id, &*wait);
                        }
                    }
                    ReadyState::Done => {
                        let _ = pending.close(id);
                    }
                    ReadyState::Unsent | ReadyState::Opened => {}
                }));
            }) as Arc<RequestOpenFn>
        }
    });

    registry.patch("request_abort", &host.net.request_abort, {
        let pending = Arc::clone(&pending);
        move |orig| {
            Arc::new(move |request: &Arc<RequestInner>| {
                // Close before the real abort runs; the terminal transition
                // it triggers then finds nothing left to close.
                let _ = pending.close(request.id());
                orig(request);
            }) as Arc<RequestAbortFn>
        }
    });
}

fn wrap_fetch(
    orig: Arc<FetchFn>,
    wait: Arc<dyn WaitCounter>,
    cfg: Arc<CompiledConfig>,
) -> Arc<FetchFn> {
    Arc::new(move |request: FetchRequest| -> FetchFuture {
        if cfg.is_blacklisted(&request.url, request.method) {
            tracing::trace!(url = %request.url, method = %request.method, "blacklisted; not tracked");
            return orig(request);
        }

        // The guard is created before the future, not inside it: a wrapped
        // future dropped without ever being polled must still release.
        let done = EndOnDrop::new(wait.start());
        let future = orig(request);
        async move {
            let _done = done;
            future.await
        }
        .boxed()
    })
}
