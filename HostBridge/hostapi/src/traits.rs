//! Host capabilities the guest reaches through imports.
//!
//! The runtime owns one boxed implementation of each per instance. Tests
//! swap in the deterministic implementations from `mem_sink`.

use crate::error::HostError;
use crate::types::LogLevel;

/// Source of random bytes for `random_fill`.
pub trait RandomSource {
    /// Fill `buf` completely or fail.
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), HostError>;
}

/// Destination for guest log lines.
///
/// The host may drop lines; the guest never observes whether a line was kept.
pub trait LogSink {
    fn log(&mut self, level: LogLevel, message: &str);
}
