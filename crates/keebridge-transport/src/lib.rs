//! WebSocket service loop for keebridge.
//!
//! Accepts local WebSocket connections from browser extensions, owns one
//! [`keebridge_core::Session`] per connection, and executes the actions
//! the session produces. Server-initiated signals fan out through
//! [`service::BridgeService::broadcast_signal`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod service;
pub mod websocket;

pub use error::{Error, Result};
pub use service::{BridgeService, RpcDispatcher};
pub use websocket::WsEndpoint;
