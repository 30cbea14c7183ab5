//! Bridge error types.

use keel_hostapi::HostError;
use keel_primitives::ErrorCode;
use wasmtime::Trap;

/// Top-level error type for the bridge crate.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Wasmtime engine, compilation, or instantiation error.
    #[error("wasmtime error: {0}")]
    Wasmtime(#[from] anyhow::Error),

    /// Module validation failed (missing exports, bad imports, etc.).
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Host-side failure, or an error value rethrown by the guest.
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// A guest export reported failure through its return slot.
    #[error("guest error {code}: {message}")]
    Guest { code: ErrorCode, message: String },

    /// The guest called `throw`.
    #[error("guest threw: {0}")]
    Thrown(String),

    /// A wrapper was used after `free` or after being consumed.
    #[error("{0} was already released")]
    Released(&'static str),

    /// Fuel exhausted during a guest call.
    #[error("fuel exhausted (instruction limit)")]
    FuelExhausted,

    /// WASM guest trapped.
    #[error("guest trapped: {0}")]
    GuestTrapped(String),
}

impl BridgeError {
    /// The boundary error code, where one applies.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Host(err) => Some(err.code()),
            Self::Guest { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Trap payload raised by the `throw` import.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct GuestThrow(pub String);

/// Classify an error that escaped a guest call.
///
/// Fuel exhaustion → `FuelExhausted`, `throw` → `Thrown`, host errors that
/// unwound through the guest keep their kind, other traps → `GuestTrapped`.
pub fn map_trap(err: anyhow::Error) -> BridgeError {
    if matches!(err.downcast_ref::<Trap>(), Some(Trap::OutOfFuel)) {
        return BridgeError::FuelExhausted;
    }
    if let Some(thrown) = err.downcast_ref::<GuestThrow>() {
        return BridgeError::Thrown(thrown.0.clone());
    }
    match err.downcast::<HostError>() {
        Ok(host) => BridgeError::Host(host),
        Err(err) => BridgeError::GuestTrapped(format!("{err:#}")),
    }
}
