//! `keel-primitives`: shared types and algorithms for the Keel bridge.
//!
//! This crate provides the error codes that cross the guest/host boundary,
//! the 32-byte key and hash types, address derivations, key pairs,
//! instructions, message compilation, transaction signing and wire format,
//! and the proof-of-work search used by the miner.
//!
//! Supports `#![no_std]` for the wasm guest (use `default-features = false`).

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod address;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod instruction;
pub mod keypair;
pub mod message;
pub mod pow;
pub mod transaction;
pub mod types;

// Re-export commonly used types at the crate root for convenience.
pub use error::{ErrorCode, PrimitiveError, PrimitiveResult};
pub use instruction::{system_transfer, AccountMeta, Instruction, SYSTEM_PROGRAM_ID};
pub use keypair::Keypair;
pub use message::Message;
pub use pow::Solution;
pub use transaction::Transaction;
pub use types::{Hash, Pubkey};
