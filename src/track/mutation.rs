//! # Mutation watcher.
//!
//! Keeps the motion tracker attached to the whole tree: the document root
//! walked at install time, every batch of nodes inserted afterwards, and
//! every shadow subtree discovered along the way (each shadow root gets its
//! own subscription — outer subscriptions cannot see into it).
//!
//! Batches arrive on the watcher's channel and are processed by a worker
//! task; disconnecting cancels the worker and drops every subscription.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::host::{Document, Element, ElementId, MutationObserver};
use crate::track::motion::MotionTracker;

pub(crate) struct MutationWatcher {
    self_ref: Weak<MutationWatcher>,
    document: Arc<Document>,
    motion: Arc<MotionTracker>,
    attached: Mutex<HashSet<ElementId>>,
    observed: Mutex<HashSet<ElementId>>,
    subs: Mutex<Vec<u64>>,
    tx: mpsc::UnboundedSender<Vec<Arc<Element>>>,
    cancel: CancellationToken,
}

impl MutationWatcher {
    /// Creates the watcher and spawns its worker task.
    pub(crate) fn spawn(document: Arc<Document>, motion: Arc<MotionTracker>) -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Arc<Element>>>();
        let watcher = Arc::new_cyclic(|self_ref: &Weak<MutationWatcher>| Self {
            self_ref: self_ref.clone(),
            document,
            motion,
            attached: Mutex::new(HashSet::new()),
            observed: Mutex::new(HashSet::new()),
            subs: Mutex::new(Vec::new()),
            tx,
            cancel: CancellationToken::new(),
        });

        let worker = Arc::clone(&watcher);
        let _task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = worker.cancel.cancelled() => break,
                    batch = rx.recv() => match batch {
                        Some(nodes) => {
                            for node in nodes {
                                worker.attach_tree(&node);
                            }
                        }
                        None => break,
                    }
                }
            }
        });

        watcher
    }

    /// Observes the document root and walks the content already present.
    pub(crate) fn start(&self) {
        let root = self.document.root();
        self.observe_root(&root);
        self.attach_tree(&root);
    }

    /// Stops the worker and drops every subscription. Idempotent.
    pub(crate) fn disconnect(&self) {
        self.cancel.cancel();
        let subs: Vec<u64> = std::mem::take(&mut *self.subs.lock());
        for sub in subs {
            self.document.unobserve(sub);
        }
    }

    fn observe_root(&self, root: &Arc<Element>) {
        let Some(observer) = self.self_ref.upgrade() else {
            return;
        };
        if self.observed.lock().insert(root.id()) {
            let sub = self
                .document
                .observe(root, observer as Arc<dyn MutationObserver>);
            self.subs.lock().push(sub);
            tracing::debug!(root = root.id(), "observing subtree");
        }
    }

    fn attach_tree(&self, node: &Arc<Element>) {
        if self.attached.lock().insert(node.id()) {
            self.motion.attach(node);
        }
        if let Some(shadow) = node.shadow_root() {
            self.observe_root(&shadow);
            self.attach_tree(&shadow);
        }
        for child in node.children() {
            self.attach_tree(&child);
        }
    }
}

#[async_trait]
impl MutationObserver for MutationWatcher {
    async fn on_insert(&self, inserted: Vec<Arc<Element>>) {
        let _ = self.tx.send(inserted);
    }
}
