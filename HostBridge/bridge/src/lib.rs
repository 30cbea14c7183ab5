//! `keel-bridge`: Wasmtime-based host side of the Keel guest/host bridge.
//!
//! This crate loads and validates a guest module, links the `bridge_host`
//! imports, and lets host code work with guest objects:
//!
//! - **Handles:** host values referenced from the guest by index
//! - **Codec:** strings and byte buffers copied through the guest allocator
//! - **Exceptions:** host failures raised in the guest, guest failures
//!   reported through return slots
//! - **Closures:** guest closures called from the host, with reference
//!   counted lifetime and deferred reclamation
//! - **Typed wrappers:** `Pubkey`, `Hash`, `Keypair`, `Instruction`,
//!   `Instructions` and `Transaction` handles over guest exports
//! - **Workers:** background tasks on their own threads, including the miner
//!
//! The primary entry points are [`Bridge::instantiate`] and [`GuestInstance`].

pub mod closure;
pub mod codec;
pub mod config;
pub mod error;
pub mod exception;
pub mod host_impl;
pub mod linker;
pub mod memory;
pub mod miner;
pub mod runtime;
pub mod validation;
pub mod worker;
pub mod wrappers;

pub use config::{BridgeConfig, MinerConfig};
pub use error::BridgeError;
pub use host_impl::HostEnv;
pub use miner::{MineRequest, MinerEvent, MINER_TASK};
pub use runtime::{Bridge, GuestInstance};
pub use worker::{BackgroundTask, Deferred, Envelope, HandlerId, TaskHandle, WorkerDispatcher, WorkerScope};
