//! Deterministic address derivations.
//!
//! Program-derived addresses are SHA-256 digests that fall off the ed25519
//! curve, so no private key exists for them.

use alloc::vec::Vec;

use crate::crypto::hash_sha256;
use crate::error::{PrimitiveError, PrimitiveResult};
use crate::types::Pubkey;

/// Maximum number of seeds in a program address derivation.
pub const MAX_SEEDS: usize = 16;

/// Maximum length of a single seed in bytes.
pub const MAX_SEED_LEN: usize = 32;

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// `sha256(base || seed || owner)`.
pub fn create_with_seed(base: &Pubkey, seed: &str, owner: &Pubkey) -> PrimitiveResult<Pubkey> {
    if seed.len() > MAX_SEED_LEN {
        return Err(PrimitiveError::InvalidSeeds(alloc::format!(
            "seed is {} bytes, max {}",
            seed.len(),
            MAX_SEED_LEN
        )));
    }
    let owner_bytes = owner.as_bytes();
    if owner_bytes.len() >= PDA_MARKER.len()
        && &owner_bytes[owner_bytes.len() - PDA_MARKER.len()..] == PDA_MARKER
    {
        return Err(PrimitiveError::InvalidSeeds("illegal owner".into()));
    }
    Ok(Pubkey(hash_sha256(&[
        base.as_bytes(),
        seed.as_bytes(),
        owner_bytes,
    ])))
}

fn check_seeds(seeds: &[&[u8]]) -> PrimitiveResult<()> {
    if seeds.len() > MAX_SEEDS {
        return Err(PrimitiveError::InvalidSeeds(alloc::format!(
            "{} seeds, max {}",
            seeds.len(),
            MAX_SEEDS
        )));
    }
    if let Some(seed) = seeds.iter().find(|s| s.len() > MAX_SEED_LEN) {
        return Err(PrimitiveError::InvalidSeeds(alloc::format!(
            "seed is {} bytes, max {}",
            seed.len(),
            MAX_SEED_LEN
        )));
    }
    Ok(())
}

/// Derive a program address from `seeds`; fails if the digest lands on the curve.
pub fn create_program_address(seeds: &[&[u8]], program_id: &Pubkey) -> PrimitiveResult<Pubkey> {
    check_seeds(seeds)?;
    let mut parts: Vec<&[u8]> = Vec::with_capacity(seeds.len() + 2);
    parts.extend_from_slice(seeds);
    parts.push(program_id.as_bytes());
    parts.push(PDA_MARKER);
    let key = Pubkey(hash_sha256(&parts));
    if key.is_on_curve() {
        return Err(PrimitiveError::InvalidSeeds(
            "derived address is on the curve".into(),
        ));
    }
    Ok(key)
}

/// Search bump seeds 255 down to 0 for the first off-curve address.
pub fn find_program_address(seeds: &[&[u8]], program_id: &Pubkey) -> PrimitiveResult<(Pubkey, u8)> {
    // The bump occupies one seed slot.
    if seeds.len() >= MAX_SEEDS {
        return Err(PrimitiveError::InvalidSeeds(alloc::format!(
            "{} seeds leave no room for a bump, max {}",
            seeds.len(),
            MAX_SEEDS - 1
        )));
    }
    check_seeds(seeds)?;
    for bump in (0..=u8::MAX).rev() {
        let bump_seed = [bump];
        let mut with_bump: Vec<&[u8]> = Vec::with_capacity(seeds.len() + 1);
        with_bump.extend_from_slice(seeds);
        with_bump.push(&bump_seed);
        if let Ok(key) = create_program_address(&with_bump, program_id) {
            return Ok((key, bump));
        }
    }
    Err(PrimitiveError::InvalidSeeds(
        "no viable bump seed".into(),
    ))
}
