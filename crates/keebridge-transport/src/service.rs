//! Connection registry and per-connection drive loop.
//!
//! Each accepted WebSocket gets one task that feeds inbound text frames to
//! its [`Session`] and executes the resulting actions. A second, per
//! connection writer task owns the sink: every outbound message goes
//! through a channel, so a slow or stuck client can never block a caller
//! that is holding the registry lock (which is exactly how the
//! signal-broadcast deadlock would otherwise happen).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::protocol::Message;

use keebridge_core::{Session, SessionAction, SessionConfig};
use keebridge_store::{KeyStore, UiHost};

use crate::websocket::{WsEndpoint, WsStream};
use crate::Result;

/// Warning shown when a stored key matches the exploit marker.
const EXPLOIT_WARNING: &str = "A stored browser connection key was rejected because it matches \
a known exploit. Please authorise your browser extension again.";

/// Handles decrypted RPC requests.
///
/// Dispatch happens after decryption and is outside this crate's scope;
/// the host plugin supplies the implementation. Returning `None` means
/// the request produces no reply.
pub trait RpcDispatcher: Send + Sync {
    /// Handle one decrypted request, optionally producing a response to
    /// encrypt and send back.
    fn dispatch(&self, plaintext: &str) -> Option<String>;
}

struct ClientHandle {
    outbound: mpsc::UnboundedSender<String>,
    session: Arc<Mutex<Session>>,
    authorised: Arc<AtomicBool>,
}

/// The long-lived service owning all client connections.
pub struct BridgeService {
    config: SessionConfig,
    store: Arc<KeyStore>,
    ui: Arc<dyn UiHost>,
    dispatcher: Arc<dyn RpcDispatcher>,
    clients: RwLock<HashMap<u64, ClientHandle>>,
    next_id: AtomicU64,
}

impl BridgeService {
    /// Assemble the service from its collaborators.
    pub fn new(
        config: SessionConfig,
        store: Arc<KeyStore>,
        ui: Arc<dyn UiHost>,
        dispatcher: Arc<dyn RpcDispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            ui,
            dispatcher,
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Accept clients forever.
    pub async fn serve(self: Arc<Self>, endpoint: WsEndpoint) -> Result<()> {
        loop {
            let (stream, peer) = endpoint.accept().await?;
            let service = Arc::clone(&self);
            tokio::spawn(async move { service.handle_connection(stream, peer).await });
        }
    }

    /// Number of currently connected clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Encrypt and send a server-initiated signal to every authorised
    /// client.
    ///
    /// Composition and encryption happen on the caller's task; the actual
    /// transport send is owned by each connection's writer task. Send
    /// failures are logged and dropped, never retried: the client's poll
    /// loop re-establishes state when it reconnects.
    pub async fn broadcast_signal(&self, plaintext: &str) {
        let clients = self.clients.read().await;
        for (id, handle) in clients.iter() {
            if !handle.authorised.load(Ordering::SeqCst) {
                continue;
            }

            let sealed =
                lock_session(&handle.session).seal_rpc(plaintext).and_then(|e| e.encode());
            match sealed {
                Ok(text) => {
                    if handle.outbound.send(text).is_err() {
                        tracing::debug!(client = id, "signal dropped, client gone");
                    }
                }
                Err(error) => {
                    tracing::warn!(client = id, %error, "failed to seal signal");
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: WsStream, peer: SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Mutex::new(Session::new(
            self.config.clone(),
            Arc::clone(&self.store),
        )));
        let authorised = lock_session(&session).authorised_flag();

        let (outbound, mut rx) = mpsc::unbounded_channel::<String>();
        self.clients.write().await.insert(
            id,
            ClientHandle {
                outbound: outbound.clone(),
                session: Arc::clone(&session),
                authorised,
            },
        );
        tracing::info!(client = id, %peer, "connection open");

        let (mut sink, mut source) = stream.split();

        // Writer task: sole owner of the sink.
        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(error) = sink.send(Message::Text(text)).await {
                    tracing::debug!(%error, "send failed, dropping message");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let actions = lock_session(&session).handle_text(&text);
                    if self.execute_actions(&session, &outbound, actions) {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // binary/ping/pong: nothing to do
                Err(error) => {
                    tracing::debug!(client = id, %error, "read failed");
                    break;
                }
            }
        }

        self.clients.write().await.remove(&id);
        drop(outbound); // writer drains remaining messages, then closes
        let _ = writer.await;
        tracing::info!(client = id, "connection closed");
    }

    /// Execute session actions in order. Returns `true` when the
    /// connection must close.
    fn execute_actions(
        &self,
        session: &Arc<Mutex<Session>>,
        outbound: &mpsc::UnboundedSender<String>,
        actions: Vec<SessionAction>,
    ) -> bool {
        for action in actions {
            match action {
                SessionAction::Send(envelope) => match envelope.encode() {
                    Ok(text) => {
                        let _ = outbound.send(text);
                    }
                    Err(error) => tracing::warn!(%error, "failed to encode reply"),
                },

                SessionAction::DeliverRpc(plaintext) => {
                    if let Some(response) = self.dispatcher.dispatch(&plaintext) {
                        let sealed =
                            lock_session(session).seal_rpc(&response).and_then(|e| e.encode());
                        match sealed {
                            Ok(text) => {
                                let _ = outbound.send(text);
                            }
                            Err(error) => tracing::warn!(%error, "failed to seal rpc response"),
                        }
                    }
                }

                SessionAction::PersistContainer(container) => {
                    // The host's config writer is not thread-safe; the
                    // save runs on the UI thread.
                    let store = Arc::clone(&self.store);
                    self.ui.post(Box::new(move || {
                        let level = store.security_level();
                        if let Err(error) = store.save(&container, level) {
                            tracing::warn!(%error, "failed to persist key container");
                        }
                    }));
                }

                SessionAction::ShowPairingPrompt(prompt) => self.ui.confirm_pairing(prompt),

                SessionAction::WarnExploitMarker => self.ui.warn(EXPLOIT_WARNING),

                SessionAction::Close => return true,
            }
        }
        false
    }
}

fn lock_session(session: &Arc<Mutex<Session>>) -> MutexGuard<'_, Session> {
    // The session never panics while locked, but a poisoned lock must not
    // take the whole service down.
    session.lock().unwrap_or_else(PoisonError::into_inner)
}
