//! Cryptographic engines for the keebridge pairing protocol.
//!
//! This crate implements the three stateful-or-pure primitives the
//! connection layer composes:
//! - SRP-6a first-contact pairing, server role ([`srp`])
//! - Stored-key nonce challenge for reconnection ([`challenge`])
//! - Per-message authenticated encryption, AES-256-CBC with a SHA-1
//!   concatenation tag in encrypt-then-MAC order ([`cipher`])
//!
//! Ground rules throughout:
//! - All secrets live in `Zeroizing` wrappers
//! - Proof and tag comparisons go through the `subtle` crate
//! - All randomness comes from `OsRng`
//! - No logging of key material

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod challenge;
pub mod cipher;
pub mod error;
pub mod srp;

pub use error::{Error, Result};
