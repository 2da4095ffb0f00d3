//! SRP-6a pairing engine, server role.
//!
//! First-contact pairing runs Secure Remote Password so the user can prove
//! knowledge of a one-time visual password without it ever crossing the
//! wire. The password is generated here, displayed by the host UI, and
//! typed into the browser extension; both sides then derive the same
//! session key `K`, which becomes the long-term symmetric key for the
//! message cipher.
//!
//! # String convention
//!
//! The wire carries big integers as lowercase hex strings, and every
//! protocol hash here operates on those string renderings (identity and
//! password as raw UTF-8). `hh(x)` below means lowercase hex of
//! `SHA-256(x)`:
//!
//! ```text
//! x  = SHA-256(s_hex || hh(I || ":" || password))    as an integer
//! v  = g^x mod N
//! k  = SHA-256(N_hex || g_hex)                       as an integer
//! B  = (k·v + g^b) mod N
//! u  = SHA-256(A_hex || B_hex)                       as an integer
//! S  = (A·v^u)^b mod N
//! K  = hh(S_hex)
//! M1 = hh(hex(H(N_hex) ⊕ H(g_hex)) || hh(I) || s_hex || A_hex || B_hex || K)
//! M2 = hh(A_hex || M1 || K)
//! ```
//!
//! The group is the RFC 5054 1024-bit safe prime with generator 2, kept
//! for compatibility with the deployed client population.

use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{Error, Result};

/// RFC 5054 1024-bit group prime, appendix A.
const N_HEX: &str = "eeaf0ab9adb38dd69c33f80afa8fc5e86072618775ff3c0b9ea2314c\
9c256576d674df7496ea81d3383b4813d692c6e0e0d5d8e250b98be48e495c1d6089dad15dc7\
d7b46154d6b6ce8ef4ad69b15d4982559b297bcf1885c529f566660e57ec68edbc3c05726cc0\
2fd4cbf4976eaa9afd5138fe8376435b9fc61d2fc0eb06e3";

/// Salt length in bytes.
const SALT_LEN: usize = 16;

/// Visual password entropy in bytes (32 bits rendered as 8 hex chars).
const PASSWORD_LEN: usize = 4;

/// The fixed SRP group: safe prime N and generator g.
#[derive(Debug, Clone)]
pub struct SrpGroup {
    n: BigUint,
    g: BigUint,
}

impl Default for SrpGroup {
    fn default() -> Self {
        // The constant is a compile-time-known valid hex string.
        let n = BigUint::parse_bytes(N_HEX.as_bytes(), 16)
            .unwrap_or_else(|| unreachable!("group prime constant parses"));
        Self { n, g: BigUint::from(2u32) }
    }
}

impl SrpGroup {
    /// The safe prime N.
    pub fn n(&self) -> &BigUint {
        &self.n
    }

    /// The generator g.
    pub fn g(&self) -> &BigUint {
        &self.g
    }
}

/// Values returned from the first handshake round, for the
/// `identifyToClient` reply.
#[derive(Debug, Clone)]
pub struct SrpChallenge {
    /// Salt `s`, lowercase hex.
    pub salt: String,
    /// Server public value `B`, lowercase hex.
    pub b_pub: String,
}

/// Values exposed after a successful proof round, for the
/// `proofToClient` reply.
#[derive(Debug, Clone)]
pub struct SrpProof {
    /// Server proof `M2`, lowercase hex.
    pub m2: String,
    /// Shared session key `K`, 64 lowercase hex chars (32 bytes).
    pub key: Zeroizing<String>,
}

struct PendingProof {
    m1: String,
    m2: String,
    key: Zeroizing<String>,
}

/// Server-side SRP-6a state for one pairing attempt.
///
/// Created when a connection begins pairing; generates the visual password
/// and salt immediately so the host can display the password while the
/// first round is in flight. [`handshake`](Self::handshake) may be called
/// again on the same instance (a repeated `identifyToServer` resets the
/// round); the password and salt are stable across resets so the dialog
/// the user is looking at stays valid.
pub struct SrpServer {
    group: SrpGroup,
    password: Zeroizing<String>,
    salt: String,
    pending: Option<PendingProof>,
    authenticated: bool,
}

impl SrpServer {
    /// Create a pairing session with a fresh visual password and salt.
    pub fn new() -> Self {
        let mut password_bytes = [0u8; PASSWORD_LEN];
        OsRng.fill_bytes(&mut password_bytes);

        let mut salt_bytes = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt_bytes);

        Self {
            group: SrpGroup::default(),
            password: Zeroizing::new(hex::encode(password_bytes)),
            salt: hex::encode(salt_bytes),
            pending: None,
            authenticated: false,
        }
    }

    /// The one-time visual password to show the user. Never transmitted.
    pub fn visual_password(&self) -> &str {
        &self.password
    }

    /// Whether the client proof has been verified on this session.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// First round: take the client identity `I` and public value `A`,
    /// produce the salt and server public value `B`.
    ///
    /// Also derives everything the proof round needs (`M1`, `M2`, `K`),
    /// so [`authenticate`](Self::authenticate) is a pure comparison.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingParam`] if `I` or `A` is empty
    /// - [`Error::IllegalParameter`] if `A` is not hex or `A mod N == 0`
    pub fn handshake(&mut self, identity: &str, a_pub: &str) -> Result<SrpChallenge> {
        if identity.is_empty() {
            return Err(Error::MissingParam("I"));
        }
        if a_pub.is_empty() {
            return Err(Error::MissingParam("A"));
        }

        // A repeated first round discards any half-finished proof state.
        self.pending = None;
        self.authenticated = false;

        let n = &self.group.n;
        let g = &self.group.g;
        let a_hex = a_pub.trim().to_ascii_lowercase();

        let a = BigUint::parse_bytes(a_hex.as_bytes(), 16).ok_or(Error::IllegalParameter("A"))?;
        if &a % n == BigUint::default() {
            return Err(Error::IllegalParameter("A"));
        }

        let n_hex = n.to_str_radix(16);
        let g_hex = g.to_str_radix(16);

        // x = H(s || H(I ":" P)), v = g^x
        let inner = sha256_hex(&format!("{}:{}", identity, &*self.password));
        let x = BigUint::from_bytes_be(&sha256_bytes(&format!("{}{}", self.salt, inner)));
        let v = g.modpow(&x, n);

        // k = H(N || g)
        let k = BigUint::from_bytes_be(&sha256_bytes(&format!("{n_hex}{g_hex}")));

        // b random below N, nonzero; B = kv + g^b
        let b = loop {
            let candidate = OsRng.gen_biguint_below(n);
            if candidate != BigUint::default() {
                break candidate;
            }
        };
        let b_pub = (&k * &v + g.modpow(&b, n)) % n;
        let b_hex = b_pub.to_str_radix(16);

        // u = H(A || B), S = (A·v^u)^b, K = H(S)
        let u = BigUint::from_bytes_be(&sha256_bytes(&format!("{a_hex}{b_hex}")));
        let premaster = ((&a * v.modpow(&u, n)) % n).modpow(&b, n);
        let key = Zeroizing::new(sha256_hex(&premaster.to_str_radix(16)));

        // M1 = H(H(N) xor H(g) || H(I) || s || A || B || K)
        let hn_xor_hg = xor_hex(&sha256_bytes(&n_hex), &sha256_bytes(&g_hex));
        let m1 = sha256_hex(&format!(
            "{hn_xor_hg}{}{}{a_hex}{b_hex}{}",
            sha256_hex(identity),
            self.salt,
            &*key
        ));
        let m2 = sha256_hex(&format!("{a_hex}{m1}{}", &*key));

        self.pending = Some(PendingProof { m1, m2, key });

        Ok(SrpChallenge { salt: self.salt.clone(), b_pub: b_hex })
    }

    /// Second round: verify the client proof `M1` in constant time.
    ///
    /// # Errors
    ///
    /// - [`Error::NoHandshake`] if no first round preceded this call
    ///   (stage mismatch; the caller drops it silently)
    /// - [`Error::ProofMismatch`] if the proof is wrong
    pub fn authenticate(&mut self, m: &str) -> Result<SrpProof> {
        let pending = self.pending.as_ref().ok_or(Error::NoHandshake)?;

        let claimed = m.trim().to_ascii_lowercase();
        if pending.m1.as_bytes().ct_eq(claimed.as_bytes()).unwrap_u8() != 1 {
            self.authenticated = false;
            return Err(Error::ProofMismatch);
        }

        self.authenticated = true;
        Ok(SrpProof { m2: pending.m2.clone(), key: pending.key.clone() })
    }
}

impl Default for SrpServer {
    fn default() -> Self {
        Self::new()
    }
}

fn sha256_bytes(input: &str) -> [u8; 32] {
    Sha256::digest(input.as_bytes()).into()
}

fn sha256_hex(input: &str) -> String {
    hex::encode(sha256_bytes(input))
}

fn xor_hex(a: &[u8; 32], b: &[u8; 32]) -> String {
    let xored: Vec<u8> = a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect();
    hex::encode(xored)
}
