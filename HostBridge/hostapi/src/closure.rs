//! Reference-counted lifetime of a guest closure seen from the host.
//!
//! A closure is identified by a context pointer `a` and a data pointer `b`
//! inside guest memory, plus the function-table indices of its invoke shim
//! and destructor. The count starts at 1 for the owning reference; every
//! invocation holds one more for its duration. When the count reaches zero
//! the destructor runs exactly once and `a` is nulled, after which every
//! invocation is rejected with `ClosureInvalidated`.
//!
//! `Transfer` closures hand ownership of `a` to the running call: `a` is
//! zeroed while the call is in flight, so a re-entrant call is rejected,
//! and restored afterwards unless the call dropped the last reference.
//! The count is raised before `a` is zeroed, so no destructor can run in
//! the window between zeroing and restoring.

use std::cell::Cell;
use std::fmt;

use crate::error::HostError;
use crate::reclaim::{Finalizer, ReclaimQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureKind {
    /// May be invoked any number of times, including re-entrantly.
    Reusable,
    /// Owns its context exclusively while running.
    Transfer,
}

impl ClosureKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Reusable),
            1 => Some(Self::Transfer),
            _ => None,
        }
    }
}

/// The state of one invocation, returned by `begin_call`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    pub a: u32,
    pub b: u32,
    pub invoke: u32,
}

pub struct ClosureCell {
    a: Cell<u32>,
    b: u32,
    cnt: Cell<u32>,
    dtor: u32,
    invoke: u32,
    kind: ClosureKind,
    finalized: Cell<bool>,
    reclaim: ReclaimQueue,
}

impl ClosureCell {
    pub fn new(
        a: u32,
        b: u32,
        dtor: u32,
        invoke: u32,
        kind: ClosureKind,
        reclaim: ReclaimQueue,
    ) -> Self {
        Self {
            a: Cell::new(a),
            b,
            cnt: Cell::new(1),
            dtor,
            invoke,
            kind,
            finalized: Cell::new(false),
            reclaim,
        }
    }

    pub fn kind(&self) -> ClosureKind {
        self.kind
    }

    pub fn ref_count(&self) -> u32 {
        self.cnt.get()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.get()
    }

    /// Enter an invocation.
    pub fn begin_call(&self) -> Result<CallFrame, HostError> {
        let a = self.a.get();
        if self.finalized.get() || a == 0 {
            return Err(HostError::ClosureInvalidated);
        }
        self.cnt.set(self.cnt.get() + 1);
        if self.kind == ClosureKind::Transfer {
            self.a.set(0);
        }
        Ok(CallFrame {
            a,
            b: self.b,
            invoke: self.invoke,
        })
    }

    /// Leave an invocation. Must run whether or not the call succeeded.
    ///
    /// Returns the destructor to run if this call dropped the last reference.
    pub fn end_call(&self, frame: &CallFrame) -> Option<Finalizer> {
        let remaining = self.cnt.get().saturating_sub(1);
        self.cnt.set(remaining);
        if remaining == 0 {
            return self.finalize(frame.a);
        }
        if self.kind == ClosureKind::Transfer && !self.finalized.get() {
            self.a.set(frame.a);
        }
        None
    }

    /// Drop the owning reference on behalf of the guest.
    ///
    /// Returns `true` when the guest must run the destructor itself; `false`
    /// when a call is still in flight (its `end_call` will finalize) or the
    /// closure was already released.
    pub fn release(&self) -> bool {
        if self.finalized.get() || self.cnt.get() == 0 {
            return false;
        }
        let remaining = self.cnt.get() - 1;
        self.cnt.set(remaining);
        if remaining == 0 {
            self.finalized.set(true);
            self.a.set(0);
            return true;
        }
        false
    }

    /// Drop the owning reference on behalf of the host.
    ///
    /// Returns the destructor for the host to run, if this was the last reference.
    pub fn release_with_finalizer(&self) -> Option<Finalizer> {
        if self.finalized.get() || self.cnt.get() == 0 {
            return None;
        }
        let remaining = self.cnt.get() - 1;
        self.cnt.set(remaining);
        if remaining == 0 {
            return self.finalize(self.a.get());
        }
        None
    }

    fn finalize(&self, a: u32) -> Option<Finalizer> {
        if self.finalized.replace(true) {
            return None;
        }
        self.a.set(0);
        Some(Finalizer::Closure {
            a,
            b: self.b,
            dtor: self.dtor,
        })
    }
}

impl Drop for ClosureCell {
    fn drop(&mut self) {
        let a = self.a.get();
        if let Some(finalizer) = self.finalize(a) {
            tracing::debug!(a, b = self.b, "closure dropped without release, queueing destructor");
            self.reclaim.push(finalizer);
        }
    }
}

impl fmt::Debug for ClosureCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureCell")
            .field("a", &self.a.get())
            .field("b", &self.b)
            .field("cnt", &self.cnt.get())
            .field("kind", &self.kind)
            .field("finalized", &self.finalized.get())
            .finish()
    }
}
