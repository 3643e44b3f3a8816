//! # Resource-load tracker.
//!
//! Wraps the element-creation entry point. Script/style elements are marked
//! intercepted and given single-fire `load`/`error` listeners that record
//! completion on the element and invoke the completion callback registered
//! at install time (the motion tracker, which owns the readiness handles).
//!
//! This tracker supplies the loaded/not-loaded signal only; it never opens
//! handles itself.

use std::sync::Arc;

use crate::host::{CreateElementFn, Element, EventListener, Host, Tag};
use crate::track::SessionGate;
use crate::track::registry::PatchRegistry;

/// Callback invoked when an intercepted resource element finishes loading,
/// successfully or not.
pub(crate) type CompletionFn = Arc<dyn Fn(&Arc<Element>) + Send + Sync>;

pub(crate) fn install(
    registry: &PatchRegistry,
    host: &Host,
    on_complete: CompletionFn,
    gate: &SessionGate,
) {
    registry.patch("create_element", &host.document.create, {
        let gate = gate.clone();
        move |orig| {
            Arc::new(move |tag: Tag| -> Arc<Element> {
                let element = orig(tag);
                if gate.is_active() && tag.is_resource() {
                    element.mark_intercepted();
                    let completion: EventListener = {
                        let on_complete = Arc::clone(&on_complete);
                        Arc::new(move |event| {
                            event.target.mark_load_observed();
                            on_complete(&event.target);
                        })
                    };
                    let _ = element.add_listener("load", true, Arc::clone(&completion));
                    let _ = element.add_listener("error", true, completion);
                }
                element
            }) as Arc<CreateElementFn>
        }
    });
}
