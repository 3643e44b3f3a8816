//! # Replaceable entry points.
//!
//! A [`Slot`] holds the current implementation of one host entry point as a
//! shared `Arc`. Host code always dispatches through the slot, so swapping
//! the stored `Arc` changes behavior for every caller — including objects
//! created before the swap — without the callers noticing.
//!
//! Restore fidelity is pointer fidelity: putting the original `Arc` back
//! leaves the host with the exact pre-install reference
//! (`Arc::ptr_eq(before, after)`).

use std::sync::Arc;

use parking_lot::RwLock;

/// One replaceable host entry point.
pub struct Slot<F: ?Sized> {
    current: RwLock<Arc<F>>,
}

impl<F: ?Sized> Slot<F> {
    /// Creates a slot with its native implementation.
    pub fn new(native: Arc<F>) -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(native),
        })
    }

    /// Returns the current implementation.
    pub fn get(&self) -> Arc<F> {
        Arc::clone(&self.current.read())
    }

    /// Installs `next` and returns the previous implementation.
    pub fn replace(&self, next: Arc<F>) -> Arc<F> {
        std::mem::replace(&mut *self.current.write(), next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Op = dyn Fn(u32) -> u32 + Send + Sync;

    #[test]
    fn test_replace_and_restore_reference_identity() {
        let native: Arc<Op> = Arc::new(|x| x + 1);
        let slot = Slot::new(Arc::clone(&native));

        let before = slot.get();
        assert!(Arc::ptr_eq(&before, &native));

        let wrapper: Arc<Op> = {
            let inner = slot.get();
            Arc::new(move |x| inner(x) * 2)
        };
        let previous = slot.replace(wrapper);
        assert!(Arc::ptr_eq(&previous, &native));
        assert_eq!((slot.get())(3), 8);

        let _ = slot.replace(previous);
        assert!(Arc::ptr_eq(&slot.get(), &native));
        assert_eq!((slot.get())(3), 4);
    }
}
