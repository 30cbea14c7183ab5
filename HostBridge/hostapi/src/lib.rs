//! `keel-hostapi`: host-side value model and capabilities for the Keel bridge.
//!
//! This crate holds everything on the host side of the bridge that does not
//! depend on the wasm runtime:
//!
//! - `HostValue`: the tagged value model for everything the guest holds by handle
//! - `HandleTable`: handle allocation with a free list and reserved sentinels
//! - `ClosureCell`: reference-counted lifetime of a guest closure
//! - `ReclaimQueue`: finalizers for resources dropped without explicit release
//! - `RandomSource` / `LogSink`: host capabilities behind guest imports
//! - `HostError`: host-side error type with `ErrorCode` conversion
//!
//! Error codes and domain types come from `keel-primitives`.

pub mod closure;
pub mod error;
pub mod globals;
pub mod heap;
pub mod mem_sink;
pub mod reclaim;
pub mod traits;
pub mod types;

// Re-export commonly used types at the crate root.
pub use closure::{CallFrame, ClosureCell, ClosureKind};
pub use error::HostError;
pub use globals::Globals;
pub use heap::HandleTable;
pub use mem_sink::{MemLogSink, OsRandom, SeededRandom, TracingSink};
pub use reclaim::{Finalizer, ReclaimQueue};
pub use traits::{LogSink, RandomSource};
pub use types::{ErrorValue, GlobalScope, HostFunction, HostValue, LogLevel, LogLine, ValueTag};
