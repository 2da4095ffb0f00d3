//! Error types for cryptographic operations.

use thiserror::Error;

/// Result type alias for cryptographic operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Cryptographic operation errors.
///
/// Handshake errors surface to the peer as protocol error envelopes; cipher
/// errors are collapsed to a single opaque failure at the wire boundary so
/// the cause never leaks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A required handshake parameter was empty or absent.
    #[error("missing parameter: {0}")]
    MissingParam(&'static str),

    /// A handshake parameter was present but unusable.
    #[error("illegal parameter: {0}")]
    IllegalParameter(&'static str),

    /// The peer's proof did not match the expected value.
    #[error("keys do not match")]
    ProofMismatch,

    /// A proof arrived with no handshake in progress.
    #[error("no handshake in progress")]
    NoHandshake,

    /// Key material had the wrong length.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length received in bytes.
        actual: usize,
    },

    /// A base64 field failed to decode.
    #[error("base64 decode failed")]
    Base64,

    /// Block padding was invalid after decryption.
    #[error("invalid padding")]
    Padding,

    /// The authentication tag did not match the ciphertext.
    #[error("authentication tag mismatch")]
    TagMismatch,

    /// Decrypted bytes were not valid UTF-8.
    #[error("plaintext is not valid UTF-8")]
    Utf8,
}
