//! Errors crossing the boundary.
//!
//! Host → guest: a fallible import that fails stores the error value in the
//! guest's exception slot through `bridge_exn_store` and returns a neutral
//! value. The guest drains the slot before its next host call.
//!
//! Guest → host: exports that can fail take a return slot pointer and write
//! `[value_a, value_b, err_handle, is_err]` there as four little-endian u32.

use wasmtime::AsContextMut;

use keel_hostapi::{HostError, HostValue};

use crate::error::BridgeError;
use crate::host_impl::{exports, BridgeState};
use crate::memory::numeric_view;

/// Size and alignment of a return slot.
pub const RET_SLOT_SIZE: u32 = 16;
pub const RET_SLOT_ALIGN: u32 = 4;

/// Finish a fallible import.
///
/// A `HostError` is handed to the guest as a pending exception and the
/// import returns `T::default()`. Anything else is a trap and propagates.
pub fn handle_error<C, T>(ctx: &mut C, result: anyhow::Result<T>) -> anyhow::Result<T>
where
    C: AsContextMut<Data = BridgeState>,
    T: Default,
{
    let err = match result {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    let host_err = match err.downcast::<HostError>() {
        Ok(host_err) => host_err,
        Err(trap) => return Err(trap),
    };
    tracing::debug!(code = %host_err.code(), "import failed, storing exception: {host_err}");
    let handle = ctx
        .as_context_mut()
        .data_mut()
        .heap
        .alloc(HostValue::Error(host_err.to_error_value()));
    let ex = exports(&*ctx)?;
    ex.exn_store.call(&mut *ctx, handle)?;
    ctx.as_context_mut().data_mut().views.invalidate();
    Ok(T::default())
}

/// The decoded contents of a return slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetSlot {
    pub a: u32,
    pub b: u32,
    pub err: u32,
    pub is_err: u32,
}

impl RetSlot {
    pub fn read<C: AsContextMut<Data = BridgeState>>(
        ctx: &mut C,
        ptr: u32,
    ) -> Result<Self, HostError> {
        let view = numeric_view(ctx)?;
        Ok(Self {
            a: view.get_u32(ptr)?,
            b: view.get_u32(ptr + 4)?,
            err: view.get_u32(ptr + 8)?,
            is_err: view.get_u32(ptr + 12)?,
        })
    }

    /// Zero the slot before handing it to the guest.
    pub fn clear<C: AsContextMut<Data = BridgeState>>(
        ctx: &mut C,
        ptr: u32,
    ) -> Result<(), HostError> {
        let mut view = numeric_view(ctx)?;
        for offset in [0, 4, 8, 12] {
            view.set_u32(ptr + offset, 0)?;
        }
        Ok(())
    }

    /// The value pair, or the guest error. Takes ownership of the error handle.
    pub fn into_result<C: AsContextMut<Data = BridgeState>>(
        self,
        ctx: &mut C,
    ) -> Result<(u32, u32), BridgeError> {
        if self.is_err == 0 {
            return Ok((self.a, self.b));
        }
        let value = ctx.as_context_mut().data_mut().heap.take(self.err)?;
        match value {
            HostValue::Error(err) => Err(BridgeError::Guest {
                code: err.code,
                message: err.message,
            }),
            other => Err(HostError::type_mismatch(
                keel_hostapi::ValueTag::Error,
                other.tag(),
            )
            .into()),
        }
    }
}
