//! `keel-wasm-guest`: the guest module of the Keel bridge.
//!
//! Compiled to `wasm32-unknown-unknown`, this crate exports:
//!
//! - the allocator the host uses to move strings and buffers in
//!   (`bridge_malloc`, `bridge_realloc`, `bridge_free`)
//! - the exception slot the host fills before a fallible import returns
//!   (`bridge_exn_store`)
//! - typed wrapper exports for `Pubkey`, `Hash`, `Keypair`, `Instruction`,
//!   `Instructions` and `Transaction`, plus `miner_*` for the background
//!   proof-of-work task
//!
//! Host functions are imported under the `bridge_host` module. Closure
//! shims are exported through the function table; see `.cargo/config.toml`.
//!
//! The `wasm32-unknown-unknown` standard library, linked through
//! `keel-primitives`' crypto dependencies, provides the allocator and panic
//! handler.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod values;

#[cfg(target_arch = "wasm32")]
mod imports;
#[cfg(target_arch = "wasm32")]
pub mod host_bridge;
#[cfg(target_arch = "wasm32")]
pub mod exports;
