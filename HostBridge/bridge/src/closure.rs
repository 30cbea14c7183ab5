//! Calling guest closures and running guest-side finalizers.
//!
//! The guest registers a closure through `closure_new` with its context
//! pointers and the function-table indices of two shims:
//!
//! - invoke `(a, b, arg_handle) -> ret_handle`: takes ownership of the
//!   argument handle and returns a handle the host takes (0 = undefined);
//! - destructor `(a, b)`: frees the closure's guest state.

use std::rc::Rc;

use wasmtime::{AsContextMut, Func};

use keel_hostapi::{ClosureCell, Finalizer, HostError, HostValue, ValueTag};

use crate::host_impl::{exports, BridgeState};

/// Resolve a function-table index.
fn table_func<C: AsContextMut<Data = BridgeState>>(ctx: &mut C, index: u32) -> anyhow::Result<Func> {
    let ex = exports(&*ctx)?;
    let entry = ex
        .table
        .get(&mut *ctx, u64::from(index))
        .ok_or_else(|| HostError::Unavailable(format!("no table entry at {index}")))?;
    let func = entry
        .as_func()
        .flatten()
        .copied()
        .ok_or_else(|| HostError::Unavailable(format!("table entry {index} is not a function")))?;
    Ok(func)
}

/// Invoke a guest closure with `arg`.
///
/// The reference count is raised for the duration of the call and lowered
/// afterwards even if the call fails; a destructor released by that drop
/// runs before returning.
pub fn invoke<C: AsContextMut<Data = BridgeState>>(
    ctx: &mut C,
    cell: &Rc<ClosureCell>,
    arg: HostValue,
) -> anyhow::Result<HostValue> {
    let frame = cell.begin_call()?;

    let result = table_func(ctx, frame.invoke).and_then(|func| {
        let shim = func.typed::<(u32, u32, u32), u32>(&*ctx)?;
        // The argument goes on the heap only once the shim resolved; the
        // guest owns it from here.
        let arg_handle = ctx.as_context_mut().data_mut().heap.alloc(arg);
        let ret = shim.call(&mut *ctx, (frame.a, frame.b, arg_handle))?;
        Ok(ret)
    });
    ctx.as_context_mut().data_mut().views.invalidate();

    if let Some(finalizer) = cell.end_call(&frame) {
        let cleanup = run_finalizer(ctx, finalizer);
        // The call's own error wins over the destructor's.
        if result.is_ok() {
            cleanup?;
        }
    }

    let ret = result?;
    if ret == 0 {
        return Ok(HostValue::Undefined);
    }
    Ok(ctx.as_context_mut().data_mut().heap.take(ret)?)
}

/// Call any callable host value: a guest closure or a host function.
pub fn call_value<C: AsContextMut<Data = BridgeState>>(
    ctx: &mut C,
    callee: &HostValue,
    arg: HostValue,
) -> anyhow::Result<HostValue> {
    match callee {
        HostValue::Closure(cell) => invoke(ctx, cell, arg),
        HostValue::Function(f) => Ok(f(arg).map_err(HostError::Raised)?),
        other => Err(HostError::type_mismatch(ValueTag::Function, other.tag()).into()),
    }
}

/// Drop the host's owning reference to a closure, running its destructor
/// if that was the last reference.
pub fn release<C: AsContextMut<Data = BridgeState>>(
    ctx: &mut C,
    cell: &ClosureCell,
) -> anyhow::Result<()> {
    match cell.release_with_finalizer() {
        Some(finalizer) => run_finalizer(ctx, finalizer),
        None => Ok(()),
    }
}

/// Run one guest-side release.
pub fn run_finalizer<C: AsContextMut<Data = BridgeState>>(
    ctx: &mut C,
    finalizer: Finalizer,
) -> anyhow::Result<()> {
    match finalizer {
        Finalizer::Closure { a, b, dtor } => {
            let func = table_func(ctx, dtor)?;
            let dtor = func.typed::<(u32, u32), ()>(&*ctx)?;
            dtor.call(&mut *ctx, (a, b))?;
        }
        Finalizer::Resource { free_export, ptr } => {
            let ex = exports(&*ctx)?;
            let free = ex
                .instance
                .get_typed_func::<u32, ()>(&mut *ctx, free_export)
                .map_err(|e| HostError::Unavailable(format!("{free_export}: {e}")))?;
            free.call(&mut *ctx, ptr)?;
        }
    }
    ctx.as_context_mut().data_mut().views.invalidate();
    Ok(())
}

/// Run every queued finalizer. Returns how many ran.
///
/// A failing finalizer does not stop the rest; the first failure is
/// returned once the queue is empty.
pub fn sweep<C: AsContextMut<Data = BridgeState>>(ctx: &mut C) -> anyhow::Result<usize> {
    let mut ran = 0;
    let mut first_err = None;
    loop {
        // Destructors may drop more references, so drain until quiet.
        let pending = ctx.as_context_mut().data_mut().reclaim.drain();
        if pending.is_empty() {
            break;
        }
        tracing::warn!(count = pending.len(), "reclaiming guest resources dropped without release");
        for finalizer in pending {
            match run_finalizer(ctx, finalizer) {
                Ok(()) => ran += 1,
                Err(err) => {
                    tracing::error!(error = %err, "guest finalizer failed");
                    first_err.get_or_insert(err);
                }
            }
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(ran),
    }
}
