//! Strings and byte buffers across the boundary.
//!
//! Host → guest copies go through the guest allocator, so the guest owns
//! the resulting `(ptr, len)` and frees it with `bridge_free(ptr, len, 1)`.
//! Guest → host copies always copy out before returning.

use wasmtime::AsContextMut;

use keel_hostapi::HostError;

use crate::host_impl::{guest_malloc, guest_realloc, BridgeState};
use crate::memory::bytes_view;

/// Copy `text` into guest memory as UTF-8.
///
/// The buffer is first sized for the UTF-16 length and filled with the
/// ASCII prefix. At the first non-ASCII character it is grown to the worst
/// case of three bytes per remaining UTF-16 unit, the rest is encoded, and
/// the buffer is shrunk to the exact length. Returns `(ptr, byte_len)`.
pub fn encode_str<C: AsContextMut<Data = BridgeState>>(
    ctx: &mut C,
    text: &str,
) -> anyhow::Result<(u32, u32)> {
    let units = utf16_len(text)?;
    let mut ptr = guest_malloc(ctx, units, 1)?;

    let offset = text.bytes().take_while(u8::is_ascii).count();
    bytes_view(ctx)?.write(ptr, &text.as_bytes()[..offset])?;
    if offset == text.len() {
        return Ok((ptr, units));
    }

    let rest = &text[offset..];
    let capacity = utf16_len(rest)?
        .checked_mul(3)
        .and_then(|n| n.checked_add(offset as u32))
        .ok_or_else(|| HostError::Internal("string too long for guest memory".into()))?;
    ptr = guest_realloc(ctx, ptr, units, capacity, 1)?;
    bytes_view(ctx)?.write(ptr + offset as u32, rest.as_bytes())?;

    let len = text.len() as u32;
    if len != capacity {
        ptr = guest_realloc(ctx, ptr, capacity, len, 1)?;
    }
    Ok((ptr, len))
}

/// Copy `bytes` into a fresh guest allocation. Returns `(ptr, len)`.
pub fn encode_bytes<C: AsContextMut<Data = BridgeState>>(
    ctx: &mut C,
    bytes: &[u8],
) -> anyhow::Result<(u32, u32)> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| HostError::Internal("buffer too long for guest memory".into()))?;
    let ptr = guest_malloc(ctx, len, 1)?;
    bytes_view(ctx)?.write(ptr, bytes)?;
    Ok((ptr, len))
}

/// Decode strict UTF-8 from guest memory.
pub fn decode_str<C: AsContextMut<Data = BridgeState>>(
    ctx: &mut C,
    ptr: u32,
    len: u32,
) -> Result<String, HostError> {
    let view = bytes_view(ctx)?;
    let bytes = view.read(ptr, len)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| HostError::InvalidUtf8(e.valid_up_to()))
}

/// Copy bytes out of guest memory.
pub fn decode_bytes<C: AsContextMut<Data = BridgeState>>(
    ctx: &mut C,
    ptr: u32,
    len: u32,
) -> Result<Vec<u8>, HostError> {
    let view = bytes_view(ctx)?;
    Ok(view.read(ptr, len)?.to_vec())
}

fn utf16_len(text: &str) -> Result<u32, HostError> {
    u32::try_from(text.encode_utf16().count())
        .map_err(|_| HostError::Internal("string too long for guest memory".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_len() {
        assert_eq!(utf16_len("").unwrap(), 0);
        assert_eq!(utf16_len("abc").unwrap(), 3);
        assert_eq!(utf16_len("é").unwrap(), 1);
        // Astral characters take a surrogate pair.
        assert_eq!(utf16_len("🦀").unwrap(), 2);
    }

    #[test]
    fn test_worst_case_capacity_covers_utf8() {
        for s in ["é", "日本語", "🦀🦀", "aé日🦀"] {
            assert!(s.len() as u32 <= utf16_len(s).unwrap() * 3, "{s}");
        }
    }
}
