//! Ed25519 key pairs.
//!
//! The 64-byte form is `secret (32) || public (32)`; `from_bytes` rejects
//! a public half that does not match the secret.

use ed25519_dalek::SigningKey;

use crate::crypto::sign_ed25519;
use crate::error::{PrimitiveError, PrimitiveResult};
use crate::types::{Pubkey, SIGNATURE_BYTES};

/// Length of the serialized key pair.
pub const KEYPAIR_BYTES: usize = 64;

#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Build from 32 bytes of secret seed material.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> PrimitiveResult<Self> {
        if bytes.len() != KEYPAIR_BYTES {
            return Err(PrimitiveError::InvalidEncoding(alloc::format!(
                "keypair must be {} bytes, got {}",
                KEYPAIR_BYTES,
                bytes.len()
            )));
        }
        let mut arr = [0u8; KEYPAIR_BYTES];
        arr.copy_from_slice(bytes);
        let signing = SigningKey::from_keypair_bytes(&arr).map_err(|_| {
            PrimitiveError::InvalidEncoding("public key does not match secret key".into())
        })?;
        Ok(Self { signing })
    }

    /// Generate from OS randomness.
    #[cfg(feature = "std")]
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing: SigningKey::generate(&mut rng),
        }
    }

    pub fn to_bytes(&self) -> [u8; KEYPAIR_BYTES] {
        self.signing.to_keypair_bytes()
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey(self.signing.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_BYTES] {
        sign_ed25519(message, &self.signing)
    }
}

impl core::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Keypair({})", self.pubkey())
    }
}
