//! Stored-key reconnection challenge.
//!
//! A client that already holds the long-term key proves possession with a
//! two-round nonce exchange instead of repeating SRP:
//!
//! 1. Server sends a random challenge `sc` (32 random bytes rendered as a
//!    lowercase decimal integer).
//! 2. Client answers with its own nonce `cc` and
//!    `cr = hex(SHA-256("1" || Key || sc || cc))`; the server verifies and
//!    returns `sr = hex(SHA-256("0" || Key || sc || cc))` so the client
//!    can authenticate the server in turn.
//!
//! The `"1"`/`"0"` domain-separation prefixes are part of the wire
//! contract and must stay bit-exact.

use num_bigint::BigUint;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{Error, Result};

/// One server-issued challenge round.
///
/// Lives for a single reconnection attempt; a failed verification discards
/// the instance.
pub struct KeyChallenge {
    sc: String,
}

impl KeyChallenge {
    /// Issue a fresh challenge from 32 bytes of OS randomness.
    pub fn new() -> Self {
        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);
        Self { sc: BigUint::from_bytes_be(&nonce).to_str_radix(10) }
    }

    /// The server challenge `sc` as sent to the client.
    pub fn sc(&self) -> &str {
        &self.sc
    }

    /// Verify the client response and produce the server proof `sr`.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingParam`] if `cc` or `cr` is empty
    /// - [`Error::ProofMismatch`] if `cr` does not match the stored key
    pub fn verify(&self, key_hex: &str, cc: &str, cr: &str) -> Result<String> {
        if cc.is_empty() {
            return Err(Error::MissingParam("cc"));
        }
        if cr.is_empty() {
            return Err(Error::MissingParam("cr"));
        }

        let expected = respond(b"1", key_hex, &self.sc, cc);
        let claimed = cr.trim().to_ascii_lowercase();
        if expected.as_bytes().ct_eq(claimed.as_bytes()).unwrap_u8() != 1 {
            return Err(Error::ProofMismatch);
        }

        Ok(respond(b"0", key_hex, &self.sc, cc))
    }
}

impl Default for KeyChallenge {
    fn default() -> Self {
        Self::new()
    }
}

/// hex(SHA-256(prefix || key || sc || cc))
fn respond(prefix: &[u8], key_hex: &str, sc: &str, cc: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix);
    hasher.update(key_hex.as_bytes());
    hasher.update(sc.as_bytes());
    hasher.update(cc.as_bytes());
    hex::encode(hasher.finalize())
}
