//! Deterministic host-capability implementations for testing.

use std::sync::{Arc, Mutex, RwLock};

use crate::error::{Error, Result};
use crate::traits::{ConfigBag, PairingPrompt, Sealer, UiHost};

/// In-memory configuration bag.
#[derive(Default)]
pub struct InMemoryConfigBag {
    values: RwLock<std::collections::HashMap<String, String>>,
}

impl InMemoryConfigBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigBag for InMemoryConfigBag {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value.to_string());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut values) = self.values.write() {
            values.remove(key);
        }
    }
}

/// Magic prefix marking a mock-sealed blob.
const SEAL_MAGIC: &[u8; 4] = b"MSL1";

/// Reversible stand-in for the OS data-protection primitive.
///
/// Seals by XOR-ing with a keystream derived from the entropy, prefixed
/// with a magic marker so tampered or foreign blobs fail to unseal the way
/// real DPAPI blobs do.
#[derive(Default)]
pub struct MockSealer;

impl MockSealer {
    /// Create a sealer.
    pub fn new() -> Self {
        Self
    }

    fn keystream(entropy: &[u8], index: usize) -> u8 {
        let e = if entropy.is_empty() { 0x5a } else { entropy[index % entropy.len()] };
        e ^ (index as u8).wrapping_mul(0x9d) ^ 0x36
    }
}

impl Sealer for MockSealer {
    fn seal(&self, plaintext: &[u8], entropy: &[u8]) -> Result<Vec<u8>> {
        let mut sealed = Vec::with_capacity(SEAL_MAGIC.len() + plaintext.len());
        sealed.extend_from_slice(SEAL_MAGIC);
        sealed.extend(
            plaintext.iter().enumerate().map(|(i, b)| b ^ Self::keystream(entropy, i)),
        );
        Ok(sealed)
    }

    fn unseal(&self, sealed: &[u8], entropy: &[u8]) -> Result<Vec<u8>> {
        let body = sealed
            .strip_prefix(SEAL_MAGIC)
            .ok_or_else(|| Error::Seal("not a sealed blob".to_string()))?;
        Ok(body.iter().enumerate().map(|(i, b)| b ^ Self::keystream(entropy, i)).collect())
    }
}

/// UI host that runs posted jobs inline and records dialogs.
#[derive(Default)]
pub struct RecordingUiHost {
    prompts: Mutex<Vec<PairingPrompt>>,
    warnings: Mutex<Vec<String>>,
}

impl RecordingUiHost {
    /// Create a recording host.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pairing prompts shown so far.
    pub fn prompts(&self) -> Vec<PairingPrompt> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Warnings shown so far.
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl UiHost for RecordingUiHost {
    fn post(&self, job: Box<dyn FnOnce() + Send>) {
        // Tests have no UI thread; run inline.
        job();
    }

    fn confirm_pairing(&self, prompt: PairingPrompt) {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt);
        }
    }

    fn warn(&self, message: &str) {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bag_roundtrip() {
        let bag = InMemoryConfigBag::new();
        assert!(bag.get("k").is_none());
        bag.set("k", "v");
        assert_eq!(bag.get("k").as_deref(), Some("v"));
        bag.remove("k");
        assert!(bag.get("k").is_none());
    }

    #[test]
    fn test_sealer_roundtrip() {
        let sealer = MockSealer::new();
        let entropy = [172u8, 218, 37, 36, 15];
        let sealed = sealer.seal(b"secret payload", &entropy).unwrap();
        assert_ne!(&sealed[4..], b"secret payload");
        assert_eq!(sealer.unseal(&sealed, &entropy).unwrap(), b"secret payload");
    }

    #[test]
    fn test_sealer_rejects_foreign_blob() {
        let sealer = MockSealer::new();
        assert!(sealer.unseal(b"random bytes", &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_sealer_wrong_entropy_garbles() {
        let sealer = MockSealer::new();
        let sealed = sealer.seal(b"secret payload", &[1, 2, 3]).unwrap();
        let unsealed = sealer.unseal(&sealed, &[9, 9, 9]).unwrap();
        assert_ne!(unsealed, b"secret payload");
    }
}
