//! Error types for persistence operations.

use thiserror::Error;

/// Result type alias for persistence operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Persistence errors.
///
/// These only surface on the *save* path. Retrieval failures of any kind
/// mean "no stored key" by design, so the client falls back to pairing.
#[derive(Debug, Error)]
pub enum Error {
    /// The OS sealing primitive refused the operation.
    #[error("sealing failed: {0}")]
    Seal(String),

    /// The container could not be serialized.
    #[error("container serialization failed: {0}")]
    Serialize(String),
}
