//! Host-side error types for the Keel bridge.
//!
//! `HostError` is the error type of every host-side operation on guest
//! values. Each variant maps onto an `ErrorCode` from `keel-primitives`, so
//! a host failure can be raised inside the guest with its kind intact.

use keel_primitives::{ErrorCode, PrimitiveError};

use crate::types::{ErrorValue, ValueTag};

/// Host-side error type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    /// Handle is out of range, vacant, or was already released.
    #[error("invalid handle {0}")]
    InvalidHandle(u32),

    /// A guest memory range fell outside the live buffer.
    #[error("out of bounds: ptr={ptr} len={len} memory size={size}")]
    OutOfBounds { ptr: u64, len: u64, size: u64 },

    /// Guest bytes were not valid UTF-8.
    #[error("invalid utf-8 at byte {0}")]
    InvalidUtf8(usize),

    /// Constructor input could not be normalised.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("deserialization failed: {0}")]
    DeserializationFailure(String),

    #[error("signature verification failed")]
    SignatureVerificationFailure,

    /// The peer side of a worker channel is gone.
    #[error("channel closed")]
    ChannelClosed,

    /// The closure was destroyed, or is already running and may not be re-entered.
    #[error("closure invalidated")]
    ClosureInvalidated,

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: ValueTag, found: ValueTag },

    /// A capability or export the operation needs is missing.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// An error raised by the guest or a host function, carried as-is.
    #[error("{0}")]
    Raised(ErrorValue),

    /// Host-only failure with no dedicated code.
    #[error("internal host error: {0}")]
    Internal(String),
}

impl HostError {
    /// The boundary error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidHandle(_) => ErrorCode::InvalidHandle,
            Self::OutOfBounds { .. } => ErrorCode::OutOfBounds,
            Self::InvalidUtf8(_) => ErrorCode::InvalidUtf8,
            Self::InvalidEncoding(_) => ErrorCode::InvalidEncoding,
            Self::DeserializationFailure(_) => ErrorCode::DeserializationFailure,
            Self::SignatureVerificationFailure => ErrorCode::SignatureVerificationFailure,
            Self::ChannelClosed => ErrorCode::ChannelClosed,
            Self::ClosureInvalidated => ErrorCode::ClosureInvalidated,
            Self::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            Self::Unavailable(_) => ErrorCode::Unavailable,
            Self::Raised(err) => err.code,
            Self::Internal(_) => ErrorCode::Error,
        }
    }

    /// Convert into the error object that crosses the boundary.
    pub fn to_error_value(&self) -> ErrorValue {
        match self {
            Self::Raised(err) => err.clone(),
            other => ErrorValue::new(other.code(), other.to_string()),
        }
    }

    pub fn type_mismatch(expected: ValueTag, found: ValueTag) -> Self {
        Self::TypeMismatch { expected, found }
    }
}

impl From<PrimitiveError> for HostError {
    fn from(err: PrimitiveError) -> Self {
        match err {
            PrimitiveError::InvalidEncoding(msg) | PrimitiveError::InvalidSeeds(msg) => {
                Self::InvalidEncoding(msg)
            }
            PrimitiveError::Deserialization(msg) => Self::DeserializationFailure(msg),
            PrimitiveError::SignatureVerification | PrimitiveError::KeypairPubkeyMismatch => {
                Self::SignatureVerificationFailure
            }
        }
    }
}

impl From<ErrorValue> for HostError {
    fn from(err: ErrorValue) -> Self {
        Self::Raised(err)
    }
}
