//! Bridge configuration.

use keel_hostapi::LogLevel;

/// Configuration for a loaded guest module and its instances.
///
/// Controls memory limits, instruction fuel and guest log capture.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Maximum linear memory pages (1 page = 64 KiB).
    /// Default: 256 pages = 16 MiB.
    pub max_memory_pages: u32,

    /// Wasmtime fuel granted to each top-level call into the guest.
    /// Nested calls made from host imports share their caller's budget.
    pub fuel_per_call: u64,

    /// Whether to collect debug logs from the guest.
    pub enable_guest_logs: bool,

    /// Captured log lines kept per instance; later lines are dropped.
    pub max_log_lines: usize,

    /// Lines below this level are ignored.
    pub guest_log_level: LogLevel,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 256, // 16 MiB
            fuel_per_call: 100_000_000,
            enable_guest_logs: false,
            max_log_lines: 256,
            guest_log_level: LogLevel::Info,
        }
    }
}

impl BridgeConfig {
    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_pages as usize * 65536
    }
}

/// Tuning for the miner background task.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Nonces hashed between two cutoff checks. Each finished batch also
    /// produces a `Progress` event.
    pub batch_size: u64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self { batch_size: 10_000 }
    }
}
