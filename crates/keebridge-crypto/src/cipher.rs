//! Per-message authenticated encryption.
//!
//! Seals RPC payloads under the long-term session key with AES-256-CBC and
//! PKCS#7 padding, then authenticates in encrypt-then-MAC order with a
//! SHA-1 concatenation tag:
//!
//! ```text
//! mac_key = SHA-1(raw_key)
//! tag     = SHA-1(mac_key || ciphertext || iv)
//! ```
//!
//! The tag is a plain hash over the concatenation, not an HMAC, and uses
//! SHA-1. This is a compatibility contract with the deployed client
//! population; substituting HMAC-SHA-256 requires a coordinated protocol
//! version change, not a local edit.
//!
//! [`open`] verifies the tag in constant time before the ciphertext is
//! touched. Callers at the wire boundary collapse every [`Error`] cause to
//! one opaque failure so the reason never reaches the peer.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block size; also the IV length.
const IV_LEN: usize = 16;

/// Length of the raw symmetric key.
const KEY_LEN: usize = 32;

/// An encrypted payload as it appears on the wire: three base64 fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    /// Base64 of the 16-byte CBC initialisation vector.
    pub iv: String,
    /// Base64 of the ciphertext.
    pub message: String,
    /// Base64 of the 20-byte SHA-1 tag.
    pub hmac: String,
}

/// Decode the hex session key into raw key bytes.
///
/// # Errors
///
/// - [`Error::IllegalParameter`] if the string is not hex
/// - [`Error::InvalidKeyLength`] if it does not decode to 32 bytes
pub fn key_from_hex(key_hex: &str) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let bytes = Zeroizing::new(hex::decode(key_hex).map_err(|_| Error::IllegalParameter("key"))?);
    if bytes.len() != KEY_LEN {
        return Err(Error::InvalidKeyLength { expected: KEY_LEN, actual: bytes.len() });
    }
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Encrypt a UTF-8 payload under the session key.
///
/// Generates a fresh random IV per message from `OsRng`.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &str) -> Result<SealedMessage> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    seal_with_iv(key, plaintext, &iv)
}

/// Encrypt with a caller-supplied IV. Exposed for deterministic tests;
/// production paths go through [`seal`].
pub fn seal_with_iv(key: &[u8; KEY_LEN], plaintext: &str, iv: &[u8; IV_LEN]) -> Result<SealedMessage> {
    let enc = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|_| Error::InvalidKeyLength { expected: KEY_LEN, actual: key.len() })?;
    let ciphertext = enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let tag = compute_tag(key, &ciphertext, iv);

    Ok(SealedMessage {
        iv: BASE64.encode(iv),
        message: BASE64.encode(&ciphertext),
        hmac: BASE64.encode(tag),
    })
}

/// Verify and decrypt a sealed payload.
///
/// # Errors
///
/// - [`Error::Base64`] if any field fails to decode
/// - [`Error::TagMismatch`] if the tag does not match (checked first)
/// - [`Error::Padding`] if CBC unpadding fails
/// - [`Error::Utf8`] if the plaintext is not UTF-8
pub fn open(key: &[u8; KEY_LEN], sealed: &SealedMessage) -> Result<Zeroizing<String>> {
    let iv = BASE64.decode(&sealed.iv).map_err(|_| Error::Base64)?;
    let ciphertext = BASE64.decode(&sealed.message).map_err(|_| Error::Base64)?;
    let claimed_tag = BASE64.decode(&sealed.hmac).map_err(|_| Error::Base64)?;

    if iv.len() != IV_LEN {
        return Err(Error::TagMismatch);
    }

    let tag = compute_tag(key, &ciphertext, &iv);
    if tag.ct_eq(&claimed_tag).unwrap_u8() != 1 {
        return Err(Error::TagMismatch);
    }

    let dec = Aes256CbcDec::new_from_slices(key, &iv)
        .map_err(|_| Error::InvalidKeyLength { expected: KEY_LEN, actual: key.len() })?;
    let plaintext = Zeroizing::new(
        dec.decrypt_padded_vec_mut::<Pkcs7>(&ciphertext).map_err(|_| Error::Padding)?,
    );

    String::from_utf8(plaintext.to_vec()).map(Zeroizing::new).map_err(|_| Error::Utf8)
}

/// tag = SHA-1(SHA-1(raw_key) || ciphertext || iv)
fn compute_tag(key: &[u8; KEY_LEN], ciphertext: &[u8], iv: &[u8]) -> [u8; 20] {
    let mac_key = Sha1::digest(key);

    let mut hasher = Sha1::new();
    hasher.update(mac_key);
    hasher.update(ciphertext);
    hasher.update(iv);
    hasher.finalize().into()
}
