//! Envelope codec and connection state machine for the keebridge
//! pairing protocol.
//!
//! This crate is the I/O-free protocol core. [`envelope`] defines the JSON
//! wire schema, [`version`] the protocol-compatibility token and feature
//! sets, and [`session`] the per-connection state machine that gates every
//! inbound envelope on the current authorization phase and produces the
//! actions (replies, dialogs, persistence) for the transport driver to
//! execute.
//!
//! Platform I/O lives in `keebridge-transport`; host capabilities and key
//! persistence in `keebridge-store`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod error;
pub mod session;
pub mod version;

pub use envelope::Envelope;
pub use error::{Error, ErrorCode, Result};
pub use session::{Session, SessionAction, SessionConfig};
pub use version::ProtocolVersion;
