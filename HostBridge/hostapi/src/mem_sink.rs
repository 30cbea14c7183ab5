//! Stock capability implementations.
//!
//! `TracingSink` and `OsRandom` are the runtime defaults. `MemLogSink` and
//! `SeededRandom` make tests deterministic and inspectable.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};

use crate::error::HostError;
use crate::traits::{LogSink, RandomSource};
use crate::types::{LogLevel, LogLine};

/// Forwards guest log lines to `tracing` under the `guest` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&mut self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => tracing::trace!(target: "guest", "{}", message),
            LogLevel::Debug => tracing::debug!(target: "guest", "{}", message),
            LogLevel::Info => tracing::info!(target: "guest", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "guest", "{}", message),
            LogLevel::Error => tracing::error!(target: "guest", "{}", message),
        }
    }
}

/// Records log lines in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemLogSink {
    lines: Rc<RefCell<Vec<LogLine>>>,
}

impl MemLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.borrow().is_empty()
    }
}

impl LogSink for MemLogSink {
    fn log(&mut self, level: LogLevel, message: &str) {
        self.lines.borrow_mut().push(LogLine {
            level,
            message: message.to_owned(),
        });
    }
}

/// Operating system randomness.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), HostError> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| HostError::Unavailable(format!("os randomness: {e}")))
    }
}

/// Reproducible randomness from a fixed seed.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for SeededRandom {
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), HostError> {
        self.rng.fill_bytes(buf);
        Ok(())
    }
}
