//! Error types and the stable wire error-code table.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Internal protocol errors.
///
/// These never cross the wire as-is; the session collapses them to
/// [`ErrorCode`] envelopes at the boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// An envelope failed to parse or serialize.
    #[error("invalid envelope: {0}")]
    Envelope(String),

    /// An operation was attempted in the wrong session phase.
    #[error("invalid session phase for {0}")]
    Phase(&'static str),

    /// Cryptographic failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] keebridge_crypto::Error),

    /// Persistence failure.
    #[error("store error: {0}")]
    Store(#[from] keebridge_store::Error),
}

/// Wire error codes.
///
/// The numeric values are the compatibility contract with the deployed
/// client population and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// No error (0).
    Success = 0,
    /// Unclassified failure (1).
    UnknownError = 1,
    /// The envelope could not be parsed or made no sense (2).
    InvalidMessage = 2,
    /// The `protocol` field was not one this server speaks (3).
    UnrecognisedProtocol = 3,
    /// Client version token too old and required features missing (4).
    VersionClientTooLow = 4,
    /// Client version token newer than this server (5).
    VersionClientTooHigh = 5,
    /// Client declared a security level below the server minimum (6).
    AuthClientSecurityLevelTooLow = 6,
    /// Server security level below the client minimum (7).
    AuthServerSecurityLevelTooLow = 7,
    /// Authentication failed (8).
    AuthFailed = 8,
    /// The channel key is unusable; the client must re-pair (9).
    AuthRestart = 9,
    /// The stored authorization has expired (10).
    AuthExpired = 10,
    /// A handshake parameter was present but unusable (11).
    AuthInvalidParam = 11,
    /// A required handshake parameter was absent (12).
    AuthMissingParam = 12,
}

impl ErrorCode {
    /// Convert to the wire integer.
    pub fn to_i32(self) -> i32 {
        self as i32
    }

    /// Convert from the wire integer.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Success),
            1 => Some(Self::UnknownError),
            2 => Some(Self::InvalidMessage),
            3 => Some(Self::UnrecognisedProtocol),
            4 => Some(Self::VersionClientTooLow),
            5 => Some(Self::VersionClientTooHigh),
            6 => Some(Self::AuthClientSecurityLevelTooLow),
            7 => Some(Self::AuthServerSecurityLevelTooLow),
            8 => Some(Self::AuthFailed),
            9 => Some(Self::AuthRestart),
            10 => Some(Self::AuthExpired),
            11 => Some(Self::AuthInvalidParam),
            12 => Some(Self::AuthMissingParam),
            _ => None,
        }
    }
}
