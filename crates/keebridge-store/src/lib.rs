//! Key container persistence and host capabilities.
//!
//! The connection core trusts three things it cannot own: the host's
//! process-wide configuration bag, the operating system's per-user
//! data-protection primitive, and the host UI thread. Each is a trait
//! here ([`traits`]), with deterministic in-memory implementations for
//! tests ([`mock`]).
//!
//! On top of those capabilities, [`store`] persists a paired client's
//! long-term key at the tier the user selected, in the legacy
//! `KeyContainerClass` XML-in-base64 format ([`container`]).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod container;
pub mod error;
pub mod mock;
pub mod store;
pub mod traits;

pub use container::KeyContainer;
pub use error::{Error, Result};
pub use store::{KeyStore, LoadOutcome, SecurityLevel};
pub use traits::{ConfigBag, PairingPrompt, Sealer, UiHost};
