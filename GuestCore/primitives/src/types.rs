//! Core value types shared by the guest and the host.
//!
//! `Pubkey` and `Hash` are 32-byte values rendered as base58 text. Both
//! accept the three constructor input forms the bridge passes in: base58
//! text, a byte buffer, or an array of numbers.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PrimitiveError, PrimitiveResult};

/// Length of a public key or hash in bytes.
pub const PUBKEY_BYTES: usize = 32;

/// Length of an ed25519 signature in bytes.
pub const SIGNATURE_BYTES: usize = 64;

/// Longest base58 rendering of 32 bytes.
pub const MAX_BASE58_LEN: usize = 44;

fn decode_base58_32(text: &str) -> PrimitiveResult<[u8; 32]> {
    if text.len() > MAX_BASE58_LEN {
        return Err(PrimitiveError::InvalidEncoding(alloc::format!(
            "base58 string too long: {} chars",
            text.len()
        )));
    }
    let bytes = bs58::decode(text)
        .into_vec()
        .map_err(|e| PrimitiveError::InvalidEncoding(alloc::format!("{}", e)))?;
    array_from_slice(&bytes)
}

fn array_from_slice(bytes: &[u8]) -> PrimitiveResult<[u8; 32]> {
    if bytes.len() != PUBKEY_BYTES {
        return Err(PrimitiveError::InvalidEncoding(alloc::format!(
            "expected {} bytes, got {}",
            PUBKEY_BYTES,
            bytes.len()
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn array_from_numbers(values: &[f64]) -> PrimitiveResult<[u8; 32]> {
    let mut bytes = Vec::with_capacity(values.len());
    for v in values {
        if !(0.0..=255.0).contains(v) || f64::from(*v as u8) != *v {
            return Err(PrimitiveError::InvalidEncoding(alloc::format!(
                "array element {} is not a byte",
                v
            )));
        }
        bytes.push(*v as u8);
    }
    array_from_slice(&bytes)
}

/// A 32-byte account address.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pubkey(pub [u8; 32]);

impl Pubkey {
    pub const fn new_from_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build from a byte slice; must be exactly 32 bytes.
    pub fn try_from_slice(bytes: &[u8]) -> PrimitiveResult<Self> {
        array_from_slice(bytes).map(Self)
    }

    /// Build from an array of numbers, each a whole number in `0..=255`.
    pub fn try_from_numbers(values: &[f64]) -> PrimitiveResult<Self> {
        array_from_numbers(values).map(Self)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    /// Whether the key is a valid point on the ed25519 curve.
    ///
    /// Program-derived addresses are exactly the keys for which this is false.
    pub fn is_on_curve(&self) -> bool {
        crate::crypto::is_on_curve(&self.0)
    }
}

impl FromStr for Pubkey {
    type Err = PrimitiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_base58_32(s).map(Self)
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pubkey({})", self.to_base58())
    }
}

impl From<[u8; 32]> for Pubkey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// A 32-byte digest, used for recent blockhashes.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const fn new_from_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn try_from_slice(bytes: &[u8]) -> PrimitiveResult<Self> {
        array_from_slice(bytes).map(Self)
    }

    pub fn try_from_numbers(values: &[f64]) -> PrimitiveResult<Self> {
        array_from_numbers(values).map(Self)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl FromStr for Hash {
    type Err = PrimitiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_base58_32(s).map(Self)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_base58())
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}
