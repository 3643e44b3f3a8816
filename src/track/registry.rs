//! # Patch registry.
//!
//! Owns every entry-point replacement made by one instrumentation session.
//! Each patch records the original `Arc` and a restore closure that puts it
//! back; [`PatchRegistry::restore_all`] drains the list, so a second restore
//! is a no-op and every entry point returns to its exact pre-install
//! reference.
//!
//! Optional entry points (slots the host does not expose) are skipped, not
//! errors — callers must tolerate hosts with reduced capabilities.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::host::Slot;

struct Patch {
    name: &'static str,
    undo: Box<dyn FnOnce() + Send>,
}

/// Replacements owned by one instrumentation session.
pub(crate) struct PatchRegistry {
    patches: Mutex<Vec<Patch>>,
}

impl PatchRegistry {
    pub(crate) fn new() -> Self {
        Self {
            patches: Mutex::new(Vec::new()),
        }
    }

    /// Wraps `slot`: reads the current entry point, installs
    /// `build(original)`, records the restore.
    pub(crate) fn patch<F>(
        &self,
        name: &'static str,
        slot: &Arc<Slot<F>>,
        build: impl FnOnce(Arc<F>) -> Arc<F>,
    ) where
        F: ?Sized + Send + Sync + 'static,
    {
        let original = slot.get();
        let wrapper = build(Arc::clone(&original));
        let _ = slot.replace(wrapper);
        tracing::debug!(entry_point = name, "patched");

        let slot = Arc::clone(slot);
        self.patches.lock().push(Patch {
            name,
            undo: Box::new(move || {
                let _ = slot.replace(original);
            }),
        });
    }

    /// Like [`PatchRegistry::patch`], skipping silently when the host does
    /// not expose the entry point.
    pub(crate) fn patch_opt<F>(
        &self,
        name: &'static str,
        slot: Option<&Arc<Slot<F>>>,
        build: impl FnOnce(Arc<F>) -> Arc<F>,
    ) where
        F: ?Sized + Send + Sync + 'static,
    {
        match slot {
            Some(slot) => self.patch(name, slot, build),
            None => tracing::debug!(entry_point = name, "not exposed by host; skipped"),
        }
    }

    /// Restores every patched entry point. Idempotent.
    ///
    /// Runs in reverse installation order so stacked patches on one slot
    /// unwind to the original reference.
    pub(crate) fn restore_all(&self) {
        let drained: Vec<Patch> = std::mem::take(&mut *self.patches.lock());
        for patch in drained.into_iter().rev() {
            tracing::debug!(entry_point = patch.name, "restored");
            (patch.undo)();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Op = dyn Fn(u32) -> u32 + Send + Sync;

    #[test]
    fn test_patch_and_restore_reference_identity() {
        let native: Arc<Op> = Arc::new(|x| x);
        let slot = Slot::new(Arc::clone(&native));
        let registry = PatchRegistry::new();

        registry.patch("op", &slot, |orig| Arc::new(move |x| orig(x) + 10));
        assert_eq!((slot.get())(1), 11);
        assert!(!Arc::ptr_eq(&slot.get(), &native));

        registry.restore_all();
        assert!(Arc::ptr_eq(&slot.get(), &native));

        // Second restore is a no-op.
        registry.restore_all();
        assert!(Arc::ptr_eq(&slot.get(), &native));
    }

    #[test]
    fn test_missing_entry_point_is_skipped() {
        let registry = PatchRegistry::new();
        registry.patch_opt::<Op>("absent", None, |orig| orig);
        registry.restore_all();
    }

    #[test]
    fn test_restore_order_tolerates_stacked_patches() {
        let native: Arc<Op> = Arc::new(|x| x);
        let slot = Slot::new(Arc::clone(&native));
        let registry = PatchRegistry::new();

        registry.patch("op", &slot, |orig| Arc::new(move |x| orig(x) + 1));
        registry.patch("op", &slot, |orig| Arc::new(move |x| orig(x) * 2));
        assert_eq!((slot.get())(3), 8);

        registry.restore_all();
        assert!(Arc::ptr_eq(&slot.get(), &native));
    }
}
