//! Transport layer errors.

use thiserror::Error;

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;

/// Transport errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Binding or accepting a connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Protocol error from the core.
    #[error("protocol error: {0}")]
    Protocol(#[from] keebridge_core::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
