//! Deferred release of guest resources.
//!
//! When the last host reference to a guest resource goes away without an
//! explicit release, a `Finalizer` is queued here. The runtime drains the
//! queue at the next call boundary and runs each finalizer against the
//! guest exactly once.

use std::cell::RefCell;
use std::rc::Rc;

/// A pending guest-side release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalizer {
    /// Run the closure destructor at table index `dtor` with `(a, b)`.
    Closure { a: u32, b: u32, dtor: u32 },
    /// Call the named free export with the resource pointer.
    Resource { free_export: &'static str, ptr: u32 },
}

/// Shared queue of finalizers awaiting the next sweep.
#[derive(Debug, Clone, Default)]
pub struct ReclaimQueue {
    pending: Rc<RefCell<Vec<Finalizer>>>,
}

impl ReclaimQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, finalizer: Finalizer) {
        self.pending.borrow_mut().push(finalizer);
    }

    /// Take everything queued so far.
    pub fn drain(&self) -> Vec<Finalizer> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_drain() {
        let q = ReclaimQueue::new();
        let other = q.clone();
        other.push(Finalizer::Resource {
            free_export: "pubkey_free",
            ptr: 64,
        });
        assert_eq!(q.len(), 1);
        let drained = q.drain();
        assert_eq!(drained.len(), 1);
        assert!(q.is_empty());
        assert!(other.is_empty());
    }
}
