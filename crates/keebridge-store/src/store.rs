//! Tiered persistence of key containers in the host config bag.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::container::KeyContainer;
use crate::error::Result;
use crate::traits::{ConfigBag, Sealer};

/// Config key prefix for stored key containers.
pub const KEY_PREFIX: &str = "KeePassRPC.Key.";

/// Config key for the server-side security level.
pub const SECURITY_LEVEL_KEY: &str = "KeePassRPC.SecurityLevel";

/// Config key for the minimum security level accepted from clients.
pub const SECURITY_LEVEL_CLIENT_MINIMUM_KEY: &str = "KeePassRPC.SecurityLevelClientMinimum";

/// Config key for the authorization lifetime in seconds.
pub const AUTH_EXPIRY_KEY: &str = "KeePassRPC.AuthorisationExpiryTime";

/// Default security level (tier 2, OS-sealed).
pub const DEFAULT_SECURITY_LEVEL: i64 = 2;

/// Default authorization lifetime: one year.
pub const DEFAULT_AUTH_EXPIRY_SECS: i64 = 31_536_000;

/// Entropy mixed into the OS sealing scope. Wire-stable.
pub const SEAL_ENTROPY: [u8; 5] = [172, 218, 37, 36, 15];

/// SHA-256 of the single ASCII character '0'. A stored key equal to this
/// value is evidence of a prior key-fixation exploit and must never be
/// accepted.
pub const EXPLOIT_MARKER_KEY: &str =
    "5feceb66ffc86f38d952786c6d696c79c2dbc239dd4e91b46729d73a27fb57e9";

/// Persistence tier for the long-term key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    /// Not yet chosen; treated like [`SecurityLevel::High`] (no persistence).
    Unset,
    /// Tier 1: plain XML, base64, config bag.
    Low,
    /// Tier 2: XML sealed with the OS data-protection primitive.
    Medium,
    /// Tier 3: never persisted; the user re-pairs each session.
    High,
}

impl SecurityLevel {
    /// Map the config integer to a tier. Out-of-range values are `Unset`.
    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => Self::Low,
            2 => Self::Medium,
            3 => Self::High,
            _ => Self::Unset,
        }
    }

    /// The config integer for this tier.
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Unset => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }
}

/// Result of looking up a stored key container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A container was found and decoded.
    Found(KeyContainer),
    /// Nothing stored, or the stored blob failed to decode/unseal. The
    /// client falls through to fresh pairing.
    Missing,
    /// The stored key matched [`EXPLOIT_MARKER_KEY`]; the entry has been
    /// removed and the user must be warned.
    ExploitMarker,
}

/// Persists and retrieves [`KeyContainer`]s at the configured tier.
pub struct KeyStore {
    bag: Arc<dyn ConfigBag>,
    sealer: Arc<dyn Sealer>,
}

impl KeyStore {
    /// Wrap the host capabilities.
    pub fn new(bag: Arc<dyn ConfigBag>, sealer: Arc<dyn Sealer>) -> Self {
        Self { bag, sealer }
    }

    /// The tier newly paired keys are stored at.
    pub fn security_level(&self) -> SecurityLevel {
        SecurityLevel::from_i64(self.bag.get_i64_or(SECURITY_LEVEL_KEY, DEFAULT_SECURITY_LEVEL))
    }

    /// The minimum security level accepted from clients.
    pub fn client_minimum(&self) -> i64 {
        self.bag.get_i64_or(SECURITY_LEVEL_CLIENT_MINIMUM_KEY, DEFAULT_SECURITY_LEVEL)
    }

    /// Authorization lifetime for new pairings, in seconds.
    pub fn expiry_seconds(&self) -> i64 {
        self.bag.get_i64_or(AUTH_EXPIRY_KEY, DEFAULT_AUTH_EXPIRY_SECS)
    }

    /// Persist a container at the given tier.
    ///
    /// Tier 3 and unset tiers store nothing; the pairing stays valid for
    /// this connection only.
    ///
    /// # Errors
    ///
    /// Serialization or sealing failures. Callers route the actual config
    /// write through the UI thread per the host's save discipline.
    pub fn save(&self, container: &KeyContainer, level: SecurityLevel) -> Result<()> {
        let encoded = match level {
            SecurityLevel::High | SecurityLevel::Unset => return Ok(()),
            SecurityLevel::Low => BASE64.encode(container.to_xml()?),
            SecurityLevel::Medium => {
                let sealed = self.sealer.seal(container.to_xml()?.as_bytes(), &SEAL_ENTROPY)?;
                BASE64.encode(sealed)
            }
        };

        self.bag.set(&config_key(&container.username), &encoded);
        tracing::debug!(username = %container.username, level = level.as_i64(), "stored key container");
        Ok(())
    }

    /// Look up the container for `username`.
    ///
    /// Tries the plain tier-1 decoding first, then tier-2 unsealing, so
    /// containers written under either tier load regardless of the current
    /// config. Every decode failure is [`LoadOutcome::Missing`], never an
    /// error: a corrupt blob just means the client pairs again.
    pub fn load(&self, username: &str) -> LoadOutcome {
        let Some(encoded) = self.bag.get(&config_key(username)) else {
            return LoadOutcome::Missing;
        };

        let Ok(blob) = BASE64.decode(encoded.trim()) else {
            tracing::debug!(username, "stored key container is not base64, ignoring");
            return LoadOutcome::Missing;
        };

        let container = std::str::from_utf8(&blob)
            .ok()
            .and_then(|xml| KeyContainer::from_xml(xml).ok())
            .or_else(|| {
                let unsealed = self.sealer.unseal(&blob, &SEAL_ENTROPY).ok()?;
                KeyContainer::from_xml(std::str::from_utf8(&unsealed).ok()?).ok()
            });

        let Some(container) = container else {
            tracing::debug!(username, "stored key container failed to decode, ignoring");
            return LoadOutcome::Missing;
        };

        if container.key.eq_ignore_ascii_case(EXPLOIT_MARKER_KEY) {
            tracing::warn!(username, "stored key matches the exploit marker, refusing it");
            self.bag.remove(&config_key(username));
            return LoadOutcome::ExploitMarker;
        }

        LoadOutcome::Found(container)
    }

    /// Delete any stored container for `username`.
    pub fn forget(&self, username: &str) {
        self.bag.remove(&config_key(username));
    }
}

fn config_key(username: &str) -> String {
    format!("{KEY_PREFIX}{username}")
}

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        // Pre-epoch clocks only happen on badly broken hosts; expire everything.
        Err(_) => 0,
    }
}
