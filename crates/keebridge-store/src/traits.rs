//! Host capability traits.
//!
//! The plugin host owns configuration storage, OS data protection, and the
//! UI thread. The core depends on these traits only, never on a specific
//! host or GUI library; production hosts implement them over their own
//! facilities and tests use [`crate::mock`].

use crate::error::Result;

/// Process-wide keyed string storage (the host's configuration bag).
///
/// Writes are not thread-safe on real hosts; callers that mutate from an
/// I/O task must route the write through [`UiHost::post`].
pub trait ConfigBag: Send + Sync {
    /// Read a value, `None` if absent.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value, creating or replacing the entry.
    fn set(&self, key: &str, value: &str);

    /// Delete an entry if present.
    fn remove(&self, key: &str);

    /// Read an integer value, falling back to `default` when the entry is
    /// absent or not a number.
    fn get_i64_or(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }
}

/// The OS per-user data-protection primitive (e.g. DPAPI).
///
/// `entropy` is mixed into the protection scope so other applications of
/// the same user cannot unseal the blob.
pub trait Sealer: Send + Sync {
    /// Protect `plaintext` for the current OS user.
    fn seal(&self, plaintext: &[u8], entropy: &[u8]) -> Result<Vec<u8>>;

    /// Reverse [`seal`](Self::seal). Fails on tampering, wrong user, or
    /// wrong entropy.
    fn unseal(&self, sealed: &[u8], entropy: &[u8]) -> Result<Vec<u8>>;
}

/// Parameters for the first-pairing confirmation dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingPrompt {
    /// The one-time visual password the user types into the extension.
    pub password: String,
    /// Client-supplied display name.
    pub client_name: String,
    /// Client-supplied description.
    pub client_description: String,
}

/// The host UI thread.
///
/// The host's dialogs and its config writer are single-threaded; anything
/// touching them from an I/O task goes through [`post`](Self::post).
pub trait UiHost: Send + Sync {
    /// Run `job` on the UI thread, fire-and-forget.
    fn post(&self, job: Box<dyn FnOnce() + Send>);

    /// Show the visual password so the user can complete pairing.
    fn confirm_pairing(&self, prompt: PairingPrompt);

    /// Show a warning to the user.
    fn warn(&self, message: &str);
}
