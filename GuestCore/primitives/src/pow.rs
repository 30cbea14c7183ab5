//! Proof-of-work search.
//!
//! A candidate is `blake3(challenge || signer || nonce_be)`; it solves the
//! challenge when the digest compares less than or equal to `difficulty`
//! as a big-endian number. Nonce space is split evenly across pool members
//! and then across each member's devices.

use serde::{Deserialize, Serialize};

use crate::crypto::hash_blake3;
use crate::types::{Hash, Pubkey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solution {
    pub hash: Hash,
    pub nonce: u64,
}

pub fn hash_candidate(challenge: &Hash, signer: &Pubkey, nonce: u64) -> Hash {
    let mut buf = [0u8; 72];
    buf[..32].copy_from_slice(challenge.as_bytes());
    buf[32..64].copy_from_slice(signer.as_bytes());
    buf[64..].copy_from_slice(&nonce.to_be_bytes());
    Hash(hash_blake3(&buf))
}

pub fn meets_difficulty(hash: &Hash, difficulty: &Hash) -> bool {
    hash.as_bytes() <= difficulty.as_bytes()
}

/// Try `count` nonces starting at `start`. Wraps at `u64::MAX`.
///
/// `best` is the lowest digest seen so far and is updated as candidates
/// beat it. Each improvement that also meets `difficulty` goes to `found`;
/// the search stops early when `found` returns false, and then returns
/// false itself.
pub fn search(
    challenge: &Hash,
    difficulty: &Hash,
    signer: &Pubkey,
    start: u64,
    count: u64,
    best: &mut Option<Hash>,
    mut found: impl FnMut(Solution) -> bool,
) -> bool {
    let mut nonce = start;
    for _ in 0..count {
        let hash = hash_candidate(challenge, signer, nonce);
        if best.map_or(true, |best| hash < best) {
            *best = Some(hash);
            if meets_difficulty(&hash, difficulty) && !found(Solution { hash, nonce }) {
                return false;
            }
        }
        nonce = nonce.wrapping_add(1);
    }
    true
}

/// Recompute a claimed solution.
pub fn verify(challenge: &Hash, difficulty: &Hash, signer: &Pubkey, solution: &Solution) -> bool {
    let hash = hash_candidate(challenge, signer, solution.nonce);
    hash == solution.hash && meets_difficulty(&hash, difficulty)
}

/// Half-open nonce range `[start, end)` for one device of one member.
pub fn nonce_range(member_id: u64, total_members: u64, device_id: u64, num_devices: u64) -> (u64, u64) {
    let member_unit = u64::MAX / total_members.max(1);
    let device_unit = member_unit / num_devices.max(1);
    let start = member_unit
        .saturating_mul(member_id)
        .saturating_add(device_unit.saturating_mul(device_id));
    (start, start.saturating_add(device_unit))
}
