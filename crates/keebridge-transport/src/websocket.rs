//! WebSocket endpoint.
//!
//! Browser extensions connect to a loopback WebSocket and exchange one
//! JSON envelope per text frame. The endpoint only listens; it never
//! dials out.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, WebSocketStream};

use crate::{Error, Result};

/// An accepted client connection.
pub type WsStream = WebSocketStream<TcpStream>;

/// Listening WebSocket endpoint.
pub struct WsEndpoint {
    listener: TcpListener,
}

impl WsEndpoint {
    /// Bind to `addr` (e.g. `"127.0.0.1:12546"`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] if the address is invalid or
    /// the bind fails.
    pub async fn bind(addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::ConnectionFailed(format!("invalid address '{addr}': {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("bind failed: {e}")))?;

        tracing::info!(%addr, "websocket endpoint listening");
        Ok(Self { listener })
    }

    /// The bound local address (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::ConnectionFailed(format!("no local address: {e}")))
    }

    /// Accept the next client and complete the WebSocket handshake.
    pub async fn accept(&self) -> Result<(WsStream, SocketAddr)> {
        let (tcp, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::ConnectionFailed(format!("accept failed: {e}")))?;

        let stream = accept_async(tcp)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("websocket handshake failed: {e}")))?;

        tracing::debug!(%peer, "client connected");
        Ok((stream, peer))
    }
}
