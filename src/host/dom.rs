//! # Document tree.
//!
//! A deliberately small rendition of an event-target tree: elements with
//! attributes, listeners (single-fire supported), children and optional
//! shadow subtrees, plus a [`Document`] that owns the root, the
//! `create_element` and `animate` entry points, mutation subscriptions and
//! the resource loader.
//!
//! ## Mutation delivery
//! Every subscription observes one root (the document root or a shadow
//! root). An insertion notifies the subscriptions of every root on the plain
//! parent chain above the inserted node — the chain ends at a shadow root,
//! so content inside a shadow tree is visible only to that tree's
//! subscription, while attaching a shadow root itself is visible to the
//! outer tree. Batches are delivered one task turn after the insertion.
//!
//! ## Resource loading
//! Script/style elements with a `src` attribute begin loading when they
//! become connected; the loader fires a single `load` or `error` event after
//! the configured latency. Inline elements have nothing to load.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::HostError;
use crate::host::motion::{AnimateFn, Animation, AnimateOptions, MotionEventNames, MotionKind, MotionStyle};
use crate::host::slot::Slot;
use crate::host::{ErrorSink, IdSource};

/// Identifier of an element, unique within a host.
pub type ElementId = u64;

/// Element kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    Div,
    Script,
    Style,
}

impl Tag {
    /// Whether elements of this kind load an external resource.
    pub fn is_resource(self) -> bool {
        matches!(self, Tag::Script | Tag::Style)
    }
}

/// Load progress of a resource element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing to load (inline content, or no `src` yet).
    Inline,
    /// Load in flight.
    Pending,
    /// Load completed.
    Loaded,
    /// Load failed.
    Failed,
}

/// Event delivered to element listeners.
pub struct EventDetail {
    /// Event name the listener was registered under.
    pub name: &'static str,
    /// Element the event fired on.
    pub target: Arc<Element>,
}

/// Element event listener.
pub type EventListener = Arc<dyn Fn(&EventDetail) + Send + Sync>;

/// Identifier returned by [`Element::add_listener`].
pub type ListenerId = u64;

struct ListenerEntry {
    id: ListenerId,
    once: bool,
    listener: EventListener,
}

/// Node of the document tree.
pub struct Element {
    id: ElementId,
    tag: Tag,
    is_shadow_root: bool,
    document: Weak<Document>,
    self_weak: Weak<Element>,
    listener_seq: AtomicU64,
    attrs: Mutex<HashMap<&'static str, String>>,
    text: Mutex<String>,
    listeners: Mutex<HashMap<&'static str, Vec<ListenerEntry>>>,
    children: Mutex<Vec<Arc<Element>>>,
    parent: Mutex<Weak<Element>>,
    shadow: Mutex<Option<Arc<Element>>>,
    shadow_host: Mutex<Weak<Element>>,
    motion: Mutex<Option<MotionStyle>>,
    load: Mutex<LoadState>,
    intercepted: AtomicBool,
    load_observed: AtomicBool,
    animating: AtomicBool,
}

impl Element {
    fn new(document: Weak<Document>, ids: &IdSource, tag: Tag, is_shadow_root: bool) -> Arc<Self> {
        let id = ids.next();
        Arc::new_cyclic(|self_weak| Self {
            id,
            tag,
            is_shadow_root,
            document,
            self_weak: self_weak.clone(),
            listener_seq: AtomicU64::new(1),
            attrs: Mutex::new(HashMap::new()),
            text: Mutex::new(String::new()),
            listeners: Mutex::new(HashMap::new()),
            children: Mutex::new(Vec::new()),
            parent: Mutex::new(Weak::new()),
            shadow: Mutex::new(None),
            shadow_host: Mutex::new(Weak::new()),
            motion: Mutex::new(None),
            load: Mutex::new(LoadState::Inline),
            intercepted: AtomicBool::new(false),
            load_observed: AtomicBool::new(false),
            animating: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn is_shadow_root(&self) -> bool {
        self.is_shadow_root
    }

    pub fn set_attr(&self, name: &'static str, value: impl Into<String>) {
        let _ = self.attrs.lock().insert(name, value.into());
    }

    pub fn attr(&self, name: &'static str) -> Option<String> {
        self.attrs.lock().get(name).cloned()
    }

    pub fn set_text(&self, text: impl Into<String>) {
        *self.text.lock() = text.into();
    }

    pub fn text(&self) -> String {
        self.text.lock().clone()
    }

    /// Registers a listener for `event`. Single-fire listeners are removed
    /// after their first invocation.
    pub fn add_listener(
        &self,
        event: &'static str,
        once: bool,
        listener: EventListener,
    ) -> ListenerId {
        let id = self.listener_seq.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .entry(event)
            .or_default()
            .push(ListenerEntry { id, once, listener });
        id
    }

    /// Removes a previously registered listener. Unknown ids are ignored.
    pub fn remove_listener(&self, event: &'static str, id: ListenerId) {
        if let Some(entries) = self.listeners.lock().get_mut(event) {
            entries.retain(|e| e.id != id);
        }
    }

    /// Dispatches `event` to the element's listeners, synchronously.
    pub fn dispatch(&self, event: &'static str) {
        let Some(target) = self.self_weak.upgrade() else {
            return;
        };
        let to_run: Vec<EventListener> = {
            let mut listeners = self.listeners.lock();
            match listeners.get_mut(event) {
                Some(entries) => {
                    let run = entries.iter().map(|e| Arc::clone(&e.listener)).collect();
                    entries.retain(|e| !e.once);
                    run
                }
                None => Vec::new(),
            }
        };
        let detail = EventDetail {
            name: event,
            target,
        };
        for listener in to_run {
            listener(&detail);
        }
    }

    /// Appends `child` to this element; a connected parent reports the
    /// insertion to the document.
    pub fn append_child(&self, child: &Arc<Element>) {
        *child.parent.lock() = self.self_weak.clone();
        self.children.lock().push(Arc::clone(child));
        if child.is_connected() {
            if let Some(doc) = self.document.upgrade() {
                doc.connected(child);
            }
        }
    }

    pub fn children(&self) -> Vec<Arc<Element>> {
        self.children.lock().clone()
    }

    pub fn parent(&self) -> Option<Arc<Element>> {
        self.parent.lock().upgrade()
    }

    /// Attaches (or returns the existing) shadow subtree root.
    pub fn attach_shadow(&self) -> Arc<Element> {
        if let Some(existing) = self.shadow.lock().clone() {
            return existing;
        }
        let Some(doc) = self.document.upgrade() else {
            // Detached from a dropped document; a dangling root is inert.
            return Element::new(Weak::new(), &IdSource::new(), Tag::Div, true);
        };
        let shadow = Element::new(
            Arc::downgrade(&doc),
            doc.ids(),
            Tag::Div,
            true,
        );
        *shadow.shadow_host.lock() = self.self_weak.clone();
        *self.shadow.lock() = Some(Arc::clone(&shadow));
        if self.is_connected() {
            doc.connected(&shadow);
        }
        shadow
    }

    pub fn shadow_root(&self) -> Option<Arc<Element>> {
        self.shadow.lock().clone()
    }

    fn shadow_host(&self) -> Option<Arc<Element>> {
        self.shadow_host.lock().upgrade()
    }

    /// Whether the element is reachable from the document root, crossing
    /// shadow boundaries through their hosts.
    pub fn is_connected(&self) -> bool {
        let Some(doc) = self.document.upgrade() else {
            return false;
        };
        let root_id = doc.root().id();
        if self.id == root_id {
            return true;
        }
        let mut cursor = self.next_up();
        while let Some(node) = cursor {
            if node.id() == root_id {
                return true;
            }
            cursor = node.next_up();
        }
        false
    }

    fn next_up(&self) -> Option<Arc<Element>> {
        match self.parent() {
            Some(parent) => Some(parent),
            None if self.is_shadow_root => self.shadow_host(),
            None => None,
        }
    }

    pub fn set_motion_style(&self, style: MotionStyle) {
        *self.motion.lock() = Some(style);
    }

    /// Computed motion style, if any motion is declared.
    pub fn motion_style(&self) -> Option<MotionStyle> {
        *self.motion.lock()
    }

    pub fn load_state(&self) -> LoadState {
        *self.load.lock()
    }

    pub(crate) fn set_load_state(&self, state: LoadState) {
        *self.load.lock() = state;
    }

    /// Marks the element as intercepted by the resource tracker.
    pub fn mark_intercepted(&self) {
        self.intercepted.store(true, Ordering::SeqCst);
    }

    pub fn is_intercepted(&self) -> bool {
        self.intercepted.load(Ordering::SeqCst)
    }

    /// Records that load completion was observed by the tracker.
    pub fn mark_load_observed(&self) {
        self.load_observed.store(true, Ordering::SeqCst);
    }

    pub fn load_observed(&self) -> bool {
        self.load_observed.load(Ordering::SeqCst)
    }

    /// Swaps the animating mark, returning the previous value.
    pub fn set_animating(&self, animating: bool) -> bool {
        self.animating.swap(animating, Ordering::SeqCst)
    }

    pub fn is_animating(&self) -> bool {
        self.animating.load(Ordering::SeqCst)
    }
}

/// Element-creation entry point.
pub type CreateElementFn = dyn Fn(Tag) -> Arc<Element> + Send + Sync;

/// Subscriber to tree insertions under one observation root.
#[async_trait]
pub trait MutationObserver: Send + Sync + 'static {
    /// Handles one batch of inserted nodes.
    async fn on_insert(&self, inserted: Vec<Arc<Element>>);
}

struct MutationSub {
    id: u64,
    root: ElementId,
    observer: Arc<dyn MutationObserver>,
}

type MotionMap = Arc<Mutex<HashMap<ElementId, (MotionKind, CancellationToken)>>>;

/// Owner of the tree: root element, entry points, subscriptions, loader.
pub struct Document {
    ids: IdSource,
    names: &'static MotionEventNames,
    root: OnceLock<Arc<Element>>,
    /// Element-creation entry point.
    pub create: Arc<Slot<CreateElementFn>>,
    /// Imperative animation entry point.
    pub animate: Arc<Slot<AnimateFn>>,
    subs: Mutex<Vec<MutationSub>>,
    motions: MotionMap,
    loader: ResourceLoader,
}

impl Document {
    pub(crate) fn new(
        ids: IdSource,
        names: &'static MotionEventNames,
        loader: ResourceLoader,
    ) -> Arc<Self> {
        let doc = Arc::new_cyclic(|weak: &Weak<Document>| {
            let create_ids = ids.clone();
            let create_weak = weak.clone();
            let create: Arc<CreateElementFn> = Arc::new(move |tag: Tag| {
                Element::new(create_weak.clone(), &create_ids, tag, false)
            });
            Self {
                ids: ids.clone(),
                names,
                root: OnceLock::new(),
                create: Slot::new(create),
                animate: Slot::new(crate::host::motion::native_animate(ids.clone())),
                subs: Mutex::new(Vec::new()),
                motions: Arc::new(Mutex::new(HashMap::new())),
                loader,
            }
        });
        let root = Element::new(Arc::downgrade(&doc), &doc.ids, Tag::Div, false);
        let _ = doc.root.set(root);
        doc
    }

    /// Document root element.
    pub fn root(&self) -> Arc<Element> {
        self.root
            .get()
            .cloned()
            .expect("document root is initialized at construction")
    }

    /// Creates a detached element through the current entry point.
    pub fn create_element(&self, tag: Tag) -> Arc<Element> {
        (self.create.get())(tag)
    }

    /// Produces an animation through the current entry point.
    pub fn animate_element(&self, element: &Arc<Element>, options: AnimateOptions) -> Arc<Animation> {
        (self.animate.get())(element, options)
    }

    /// Subscribes `observer` to insertions under `root`.
    pub fn observe(&self, root: &Arc<Element>, observer: Arc<dyn MutationObserver>) -> u64 {
        let id = self.ids.next();
        self.subs.lock().push(MutationSub {
            id,
            root: root.id(),
            observer,
        });
        id
    }

    /// Drops a subscription. Unknown ids are ignored.
    pub fn unobserve(&self, sub: u64) {
        self.subs.lock().retain(|s| s.id != sub);
    }

    /// Motion event names this host emits.
    pub fn event_names(&self) -> &'static MotionEventNames {
        self.names
    }

    pub(crate) fn ids(&self) -> &IdSource {
        &self.ids
    }

    pub(crate) fn motions_handle(&self) -> MotionMap {
        Arc::clone(&self.motions)
    }

    pub(crate) fn track_motion(&self, element: ElementId, kind: MotionKind, token: CancellationToken) {
        let _ = self.motions.lock().insert(element, (kind, token));
    }

    /// Reacts to a node becoming connected: starts resource loads for the
    /// subtree and reports the insertion to matching subscriptions.
    pub(crate) fn connected(&self, node: &Arc<Element>) {
        self.start_loads(node);
        self.deliver(node);
    }

    fn start_loads(&self, node: &Arc<Element>) {
        if node.tag().is_resource() && node.load_state() == LoadState::Inline {
            if let Some(src) = node.attr("src") {
                node.set_load_state(LoadState::Pending);
                self.loader.spawn_load(Arc::clone(node), src);
            }
        }
        if let Some(shadow) = node.shadow_root() {
            self.start_loads(&shadow);
        }
        for child in node.children() {
            self.start_loads(&child);
        }
    }

    /// Delivers an insertion to every subscription rooted on the parent
    /// chain, one task turn later.
    fn deliver(&self, node: &Arc<Element>) {
        let mut roots = Vec::new();
        let mut cursor = if node.is_shadow_root() {
            node.shadow_host()
        } else {
            node.parent()
        };
        while let Some(ancestor) = cursor {
            roots.push(ancestor.id());
            cursor = ancestor.parent();
        }

        let observers: Vec<Arc<dyn MutationObserver>> = self
            .subs
            .lock()
            .iter()
            .filter(|s| roots.contains(&s.root))
            .map(|s| Arc::clone(&s.observer))
            .collect();

        for observer in observers {
            let inserted = vec![Arc::clone(node)];
            let _task = tokio::spawn(async move {
                tokio::task::yield_now().await;
                observer.on_insert(inserted).await;
            });
        }
    }
}

/// Fires `load`/`error` events for resource elements after a configured
/// latency.
#[derive(Clone)]
pub(crate) struct ResourceLoader {
    latency: Arc<Mutex<Duration>>,
    failing: Arc<Mutex<Vec<String>>>,
    errors: ErrorSink,
}

impl ResourceLoader {
    pub(crate) fn new(latency: Duration, failing: Vec<String>, errors: ErrorSink) -> Self {
        Self {
            latency: Arc::new(Mutex::new(latency)),
            failing: Arc::new(Mutex::new(failing)),
            errors,
        }
    }

    fn spawn_load(&self, element: Arc<Element>, url: String) {
        let latency = *self.latency.lock();
        let failed = self.failing.lock().iter().any(|u| *u == url);
        let errors = self.errors.clone();
        let _task = tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            if failed {
                element.set_load_state(LoadState::Failed);
                errors.report(HostError::ResourceFailed { url });
                element.dispatch("error");
            } else {
                element.set_load_state(LoadState::Loaded);
                element.dispatch("load");
            }
        });
    }
}
