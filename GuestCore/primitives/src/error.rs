//! Error codes shared by the guest and the host.
//!
//! An `ErrorCode` travels across the boundary as an `i32` alongside an error
//! message (see `error_new` in the host import table). Both sides map their
//! native error types onto these codes, so a failure raised on one side keeps
//! its kind when it is re-raised on the other.

use alloc::string::String;
use core::fmt;

/// Cross-boundary error kinds. The repr values are part of the ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Error = 0,
    InvalidHandle = 1,
    OutOfBounds = 2,
    InvalidUtf8 = 3,
    InvalidEncoding = 4,
    DeserializationFailure = 5,
    SignatureVerificationFailure = 6,
    ChannelClosed = 7,
    ClosureInvalidated = 8,
    TypeMismatch = 9,
    Unavailable = 10,
}

impl ErrorCode {
    /// Convert from the `i32` carried across the boundary.
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Error),
            1 => Some(Self::InvalidHandle),
            2 => Some(Self::OutOfBounds),
            3 => Some(Self::InvalidUtf8),
            4 => Some(Self::InvalidEncoding),
            5 => Some(Self::DeserializationFailure),
            6 => Some(Self::SignatureVerificationFailure),
            7 => Some(Self::ChannelClosed),
            8 => Some(Self::ClosureInvalidated),
            9 => Some(Self::TypeMismatch),
            10 => Some(Self::Unavailable),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "Error",
            Self::InvalidHandle => "InvalidHandle",
            Self::OutOfBounds => "OutOfBounds",
            Self::InvalidUtf8 => "InvalidUtf8",
            Self::InvalidEncoding => "InvalidEncoding",
            Self::DeserializationFailure => "DeserializationFailure",
            Self::SignatureVerificationFailure => "SignatureVerificationFailure",
            Self::ChannelClosed => "ChannelClosed",
            Self::ClosureInvalidated => "ClosureInvalidated",
            Self::TypeMismatch => "TypeMismatch",
            Self::Unavailable => "Unavailable",
        };
        f.write_str(name)
    }
}

/// Error type for the domain algorithms in this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    /// Constructor input could not be normalised (bad base58, wrong length).
    InvalidEncoding(String),

    /// Wire bytes could not be decoded.
    Deserialization(String),

    /// A signature did not verify against its message.
    SignatureVerification,

    /// Seed or derivation constraint violated.
    InvalidSeeds(String),

    /// A transaction was signed by a key it does not list as a signer.
    KeypairPubkeyMismatch,
}

impl PrimitiveError {
    /// The boundary error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidEncoding(_) | Self::InvalidSeeds(_) => ErrorCode::InvalidEncoding,
            Self::Deserialization(_) => ErrorCode::DeserializationFailure,
            Self::SignatureVerification | Self::KeypairPubkeyMismatch => {
                ErrorCode::SignatureVerificationFailure
            }
        }
    }
}

impl fmt::Display for PrimitiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEncoding(msg) => write!(f, "invalid encoding: {}", msg),
            Self::Deserialization(msg) => write!(f, "deserialization failed: {}", msg),
            Self::SignatureVerification => write!(f, "signature verification failed"),
            Self::InvalidSeeds(msg) => write!(f, "invalid seeds: {}", msg),
            Self::KeypairPubkeyMismatch => write!(f, "keypair is not a required signer"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PrimitiveError {}

/// Convenience result type for this crate.
pub type PrimitiveResult<T> = core::result::Result<T, PrimitiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_from_i32_roundtrip() {
        for code in 0..=10 {
            let ec = ErrorCode::from_i32(code).unwrap();
            assert_eq!(ec.as_i32(), code);
        }
    }

    #[test]
    fn test_error_code_from_i32_invalid() {
        assert_eq!(ErrorCode::from_i32(-1), None);
        assert_eq!(ErrorCode::from_i32(11), None);
    }

    #[test]
    fn test_primitive_error_codes() {
        assert_eq!(
            PrimitiveError::InvalidEncoding("x".into()).code(),
            ErrorCode::InvalidEncoding
        );
        assert_eq!(
            PrimitiveError::Deserialization("x".into()).code(),
            ErrorCode::DeserializationFailure
        );
        assert_eq!(
            PrimitiveError::SignatureVerification.code(),
            ErrorCode::SignatureVerificationFailure
        );
    }

    #[test]
    fn test_display() {
        let s = alloc::format!("{}", PrimitiveError::Deserialization("short".into()));
        assert!(s.contains("short"));
        assert_eq!(alloc::format!("{}", ErrorCode::InvalidUtf8), "InvalidUtf8");
    }
}
