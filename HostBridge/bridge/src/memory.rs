//! Bounds-checked views over guest linear memory.
//!
//! A view borrows the store for its whole lifetime, so it cannot be held
//! across a call back into the guest. `MemoryViews` remembers the identity
//! (base address and length) of the buffer the last view was built over;
//! after every guest call the cache is marked unchecked, and the next view
//! compares identities and rebuilds when memory has moved or grown.

use std::ops::Range;

use wasmtime::{AsContextMut, StoreContextMut};

use keel_hostapi::HostError;

use crate::host_impl::BridgeState;

/// Memoized identity of guest linear memory.
#[derive(Debug, Default)]
pub struct MemoryViews {
    identity: Option<(usize, usize)>,
    checked: bool,
    rebuilds: u64,
}

impl MemoryViews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the cached identity as unchecked. Called after every guest call.
    pub fn invalidate(&mut self) {
        self.checked = false;
    }

    /// Number of times a view had to be rebuilt over a new buffer.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    fn observe(&mut self, base: usize, len: usize) {
        if self.checked && self.identity == Some((base, len)) {
            return;
        }
        if self.identity != Some((base, len)) {
            self.rebuilds += 1;
            tracing::trace!(base, len, rebuilds = self.rebuilds, "rebuilding memory views");
            self.identity = Some((base, len));
        }
        self.checked = true;
    }
}

/// Validate that `[ptr, ptr+len)` lies inside a buffer of `size` bytes.
fn checked_range(size: usize, ptr: u32, len: usize) -> Result<Range<usize>, HostError> {
    let start = ptr as usize;
    let end = start.checked_add(len).filter(|end| *end <= size);
    match end {
        Some(end) => Ok(start..end),
        None => Err(HostError::OutOfBounds {
            ptr: u64::from(ptr),
            len: len as u64,
            size: size as u64,
        }),
    }
}

fn live_memory_and_state<'a>(
    ctx: StoreContextMut<'a, BridgeState>,
) -> Result<(&'a mut [u8], &'a mut BridgeState), HostError> {
    let memory = ctx
        .data()
        .exports
        .as_ref()
        .map(|ex| ex.memory)
        .ok_or_else(|| HostError::Unavailable("guest memory is not bound yet".into()))?;
    let (data, state) = memory.data_and_store_mut(ctx);
    state.views.observe(data.as_ptr() as usize, data.len());
    Ok((data, state))
}

fn live_memory<'a>(
    ctx: StoreContextMut<'a, BridgeState>,
) -> Result<&'a mut [u8], HostError> {
    live_memory_and_state(ctx).map(|(data, _)| data)
}

/// Byte-granular view of guest memory.
pub struct ByteView<'a> {
    data: &'a mut [u8],
}

impl<'a> ByteView<'a> {
    pub(crate) fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read(&self, ptr: u32, len: u32) -> Result<&[u8], HostError> {
        let range = checked_range(self.data.len(), ptr, len as usize)?;
        Ok(&self.data[range])
    }

    pub fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), HostError> {
        let range = checked_range(self.data.len(), ptr, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }
}

/// Little-endian numeric view of guest memory.
pub struct NumericView<'a> {
    data: &'a mut [u8],
}

impl<'a> NumericView<'a> {
    pub(crate) fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    fn array<const N: usize>(&self, ptr: u32) -> Result<[u8; N], HostError> {
        let range = checked_range(self.data.len(), ptr, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[range]);
        Ok(out)
    }

    fn put(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), HostError> {
        let range = checked_range(self.data.len(), ptr, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn get_u32(&self, ptr: u32) -> Result<u32, HostError> {
        self.array(ptr).map(u32::from_le_bytes)
    }

    pub fn set_u32(&mut self, ptr: u32, value: u32) -> Result<(), HostError> {
        self.put(ptr, &value.to_le_bytes())
    }

    pub fn get_i32(&self, ptr: u32) -> Result<i32, HostError> {
        self.array(ptr).map(i32::from_le_bytes)
    }

    pub fn set_i32(&mut self, ptr: u32, value: i32) -> Result<(), HostError> {
        self.put(ptr, &value.to_le_bytes())
    }

    pub fn get_f64(&self, ptr: u32) -> Result<f64, HostError> {
        self.array(ptr).map(f64::from_le_bytes)
    }

    pub fn set_f64(&mut self, ptr: u32, value: f64) -> Result<(), HostError> {
        self.put(ptr, &value.to_le_bytes())
    }
}

/// A byte view over the current guest memory.
pub fn bytes_view<C: AsContextMut<Data = BridgeState>>(
    ctx: &mut C,
) -> Result<ByteView<'_>, HostError> {
    live_memory(ctx.as_context_mut()).map(ByteView::new)
}

/// A numeric view over the current guest memory.
pub fn numeric_view<C: AsContextMut<Data = BridgeState>>(
    ctx: &mut C,
) -> Result<NumericView<'_>, HostError> {
    live_memory(ctx.as_context_mut()).map(NumericView::new)
}

/// The guest range `[ptr, ptr+len)` alongside the host state, so host
/// services can write into guest memory in place.
pub fn guest_range_mut<C: AsContextMut<Data = BridgeState>>(
    ctx: &mut C,
    ptr: u32,
    len: u32,
) -> Result<(&mut [u8], &mut BridgeState), HostError> {
    let (data, state) = live_memory_and_state(ctx.as_context_mut())?;
    let range = checked_range(data.len(), ptr, len as usize)?;
    Ok((&mut data[range], state))
}
