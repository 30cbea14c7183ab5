//! The parts of the guest ABI that do not touch the host: constructor input
//! normalisation and the return slot layout.

use alloc::string::String;
use alloc::vec::Vec;
use core::str::FromStr;

use keel_primitives::{Hash, PrimitiveError, PrimitiveResult, Pubkey};

/// Value tags reported by `value_tag`.
pub const TAG_STRING: u32 = 4;
pub const TAG_BYTES: u32 = 5;
pub const TAG_ARRAY: u32 = 6;

/// Closure kind for `FnMut` state: the host refuses re-entrant calls.
pub const KIND_TRANSFER: u32 = 1;

/// Level passed to the `log` import for warnings.
pub const LOG_WARN: u32 = 3;

/// Warning for a pending exception overwritten before anything took it.
pub fn superseded_warning(superseded: u32, incoming: u32) -> String {
    alloc::format!("exception {superseded} dropped unread, replaced by {incoming}")
}

/// A constructor argument read out of a host value.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyInput {
    /// Base58 text.
    Text(String),
    Bytes(Vec<u8>),
    /// Whole numbers in `0..=255`.
    Numbers(Vec<f64>),
    /// Any other value; carries its tag.
    Unsupported(u32),
}

impl KeyInput {
    fn unsupported(tag: u32) -> PrimitiveError {
        PrimitiveError::InvalidEncoding(alloc::format!("unsupported input of type tag {tag}"))
    }

    pub fn to_pubkey(&self) -> PrimitiveResult<Pubkey> {
        match self {
            Self::Text(text) => Pubkey::from_str(text),
            Self::Bytes(bytes) => Pubkey::try_from_slice(bytes),
            Self::Numbers(numbers) => Pubkey::try_from_numbers(numbers),
            Self::Unsupported(tag) => Err(Self::unsupported(*tag)),
        }
    }

    pub fn to_hash(&self) -> PrimitiveResult<Hash> {
        match self {
            Self::Text(text) => Hash::from_str(text),
            Self::Bytes(bytes) => Hash::try_from_slice(bytes),
            Self::Numbers(numbers) => Hash::try_from_numbers(numbers),
            Self::Unsupported(tag) => Err(Self::unsupported(*tag)),
        }
    }
}

/// Seeds for address derivation, as a list of byte strings.
pub fn seed_slices(seeds: &[Vec<u8>]) -> Vec<&[u8]> {
    seeds.iter().map(Vec::as_slice).collect()
}

/// `[value_a, value_b, err_handle, is_err]`, written to the host's retptr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetSlot {
    pub a: u32,
    pub b: u32,
    pub err: u32,
    pub is_err: u32,
}

impl RetSlot {
    pub fn ok(a: u32, b: u32) -> Self {
        Self {
            a,
            b,
            err: 0,
            is_err: 0,
        }
    }

    pub fn err(handle: u32) -> Self {
        Self {
            a: 0,
            b: 0,
            err: handle,
            is_err: 1,
        }
    }

    pub fn words(self) -> [u32; 4] {
        [self.a, self.b, self.err, self.is_err]
    }
}
