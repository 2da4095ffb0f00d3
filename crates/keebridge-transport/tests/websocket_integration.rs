//! Live-socket tests: stored-key reconnection, encrypted RPC echo,
//! server-initiated signals, and malformed-frame teardown.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

use keebridge_core::envelope::{Envelope, JsonrpcPayload, KeyPayload};
use keebridge_core::{ProtocolVersion, SessionConfig};
use keebridge_crypto::cipher::{self, SealedMessage};
use keebridge_store::mock::{InMemoryConfigBag, MockSealer, RecordingUiHost};
use keebridge_store::{KeyContainer, KeyStore, SecurityLevel, UiHost};
use keebridge_transport::{BridgeService, RpcDispatcher, WsEndpoint};

const KEY_HEX: &str = "cdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcd";

struct EchoDispatcher;

impl RpcDispatcher for EchoDispatcher {
    fn dispatch(&self, plaintext: &str) -> Option<String> {
        Some(format!(r#"{{"echo":{plaintext}}}"#))
    }
}

fn token() -> i32 {
    ProtocolVersion::current().token()
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

async fn start_service(store: Arc<KeyStore>) -> (Arc<BridgeService>, String) {
    let ui: Arc<dyn UiHost> = RecordingUiHost::new();
    let service =
        BridgeService::new(SessionConfig::default(), store, ui, Arc::new(EchoDispatcher));

    let endpoint = WsEndpoint::bind("127.0.0.1:0").await.unwrap();
    let addr = endpoint.local_addr().unwrap();
    tokio::spawn(Arc::clone(&service).serve(endpoint));

    (service, format!("ws://{addr}"))
}

fn paired_store() -> Arc<KeyStore> {
    let store = Arc::new(KeyStore::new(
        Arc::new(InMemoryConfigBag::new()),
        Arc::new(MockSealer::new()),
    ));
    let container = KeyContainer {
        key: KEY_HEX.to_string(),
        auth_expires: keebridge_store::store::unix_now() + 3600,
        username: "alice".to_string(),
        client_name: "Browser".to_string(),
    };
    store.save(&container, SecurityLevel::Medium).unwrap();
    store
}

async fn recv_envelope(ws: &mut WsClient) -> Envelope {
    loop {
        match ws.next().await.expect("stream open").expect("read ok") {
            Message::Text(text) => return Envelope::decode(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Run the stored-key challenge over the socket until authorised.
async fn authorise(ws: &mut WsClient) {
    let hello = Envelope {
        protocol: "setup".to_string(),
        version: token(),
        key: Some(KeyPayload {
            username: Some("alice".to_string()),
            security_level: Some(2),
            ..KeyPayload::default()
        }),
        ..Envelope::default()
    };
    ws.send(Message::Text(hello.encode().unwrap())).await.unwrap();

    let reply = recv_envelope(ws).await;
    let sc = reply.key.as_ref().and_then(|k| k.sc.clone()).expect("server challenge");

    let cc = "1618033988749894848";
    let cr = sha256_hex(&format!("1{KEY_HEX}{sc}{cc}"));
    let response = Envelope {
        protocol: "setup".to_string(),
        version: token(),
        key: Some(KeyPayload {
            cc: Some(cc.to_string()),
            cr: Some(cr),
            security_level: Some(2),
            ..KeyPayload::default()
        }),
        ..Envelope::default()
    };
    ws.send(Message::Text(response.encode().unwrap())).await.unwrap();

    let reply = recv_envelope(ws).await;
    let sr = reply.key.as_ref().and_then(|k| k.sr.clone()).expect("server proof");
    assert_eq!(sr, sha256_hex(&format!("0{KEY_HEX}{sc}{cc}")));
}

#[tokio::test]
async fn reconnect_then_encrypted_echo() {
    let (_service, url) = start_service(paired_store()).await;
    let (mut ws, _) = connect_async(&url).await.unwrap();

    authorise(&mut ws).await;

    // Encrypted request, encrypted echo back.
    let key = cipher::key_from_hex(KEY_HEX).unwrap();
    let sealed = cipher::seal(&key, r#"{"method":"ping"}"#).unwrap();
    let request = Envelope {
        protocol: "jsonrpc".to_string(),
        version: token(),
        jsonrpc: Some(JsonrpcPayload {
            iv: sealed.iv,
            message: sealed.message,
            hmac: sealed.hmac,
        }),
        ..Envelope::default()
    };
    ws.send(Message::Text(request.encode().unwrap())).await.unwrap();

    let reply = recv_envelope(&mut ws).await;
    let payload = reply.jsonrpc.expect("encrypted reply");
    let opened = cipher::open(
        &key,
        &SealedMessage { iv: payload.iv, message: payload.message, hmac: payload.hmac },
    )
    .unwrap();
    assert_eq!(&**opened, r#"{"echo":{"method":"ping"}}"#);
}

#[tokio::test]
async fn signal_broadcast_reaches_authorised_client() {
    let (service, url) = start_service(paired_store()).await;
    let (mut ws, _) = connect_async(&url).await.unwrap();

    authorise(&mut ws).await;

    service.broadcast_signal(r#"{"signal":"databaseOpen"}"#).await;

    let reply = recv_envelope(&mut ws).await;
    let payload = reply.jsonrpc.expect("sealed signal");
    let key = cipher::key_from_hex(KEY_HEX).unwrap();
    let opened = cipher::open(
        &key,
        &SealedMessage { iv: payload.iv, message: payload.message, hmac: payload.hmac },
    )
    .unwrap();
    assert_eq!(&**opened, r#"{"signal":"databaseOpen"}"#);
}

#[tokio::test]
async fn signal_skips_unauthorised_client() {
    let (service, url) = start_service(paired_store()).await;
    let (mut ws, _) = connect_async(&url).await.unwrap();

    // Connected but never authorised: the signal must not arrive.
    // Wait for registration before broadcasting.
    for _ in 0..50 {
        if service.client_count().await == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    service.broadcast_signal(r#"{"signal":"databaseOpen"}"#).await;

    // Drive one request/reply round-trip; the only frame back must be the
    // reply to it, not the signal.
    authorise(&mut ws).await;
}

#[tokio::test]
async fn malformed_frame_gets_error_then_close() {
    let (_service, url) = start_service(paired_store()).await;
    let (mut ws, _) = connect_async(&url).await.unwrap();

    ws.send(Message::Text("this is not json".to_string())).await.unwrap();

    let reply = recv_envelope(&mut ws).await;
    assert_eq!(reply.protocol, "error");
    assert_eq!(reply.error.unwrap().code, 2); // INVALID_MESSAGE

    // The server closes after the error envelope.
    loop {
        match ws.next().await {
            None | Some(Ok(Message::Close(_))) | Some(Err(_)) => break,
            Some(Ok(_)) => continue,
        }
    }
}
