//! The JSON envelope: the fixed outer schema of every wire message.
//!
//! One envelope per WebSocket text frame. Unknown fields are ignored so
//! newer clients can talk to older servers; absent optional fields are
//! `None` and omitted on output.

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorCode, Result};

/// Protocol tag for handshake traffic.
pub const PROTOCOL_SETUP: &str = "setup";
/// Protocol tag for encrypted RPC traffic.
pub const PROTOCOL_JSONRPC: &str = "jsonrpc";
/// Protocol tag for error reports.
pub const PROTOCOL_ERROR: &str = "error";

/// SRP handshake stage names.
pub mod stage {
    /// Client → server: identity and public value A.
    pub const IDENTIFY_TO_SERVER: &str = "identifyToServer";
    /// Server → client: salt and public value B.
    pub const IDENTIFY_TO_CLIENT: &str = "identifyToClient";
    /// Client → server: proof M1.
    pub const PROOF_TO_SERVER: &str = "proofToServer";
    /// Server → client: proof M2.
    pub const PROOF_TO_CLIENT: &str = "proofToClient";
}

/// The outer wire object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// One of [`PROTOCOL_SETUP`], [`PROTOCOL_JSONRPC`], [`PROTOCOL_ERROR`].
    pub protocol: String,

    /// The sender's protocol-compatibility token.
    #[serde(default)]
    pub version: i32,

    /// Capability strings, immutable once declared on a connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,

    /// SRP handshake sub-payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srp: Option<SrpPayload>,

    /// Stored-key challenge sub-payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyPayload>,

    /// Encrypted RPC sub-payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<JsonrpcPayload>,

    /// Error report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,

    /// Free-form client name shown during first pairing.
    #[serde(
        rename = "clientDisplayName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_display_name: Option<String>,

    /// Free-form client description shown during first pairing.
    #[serde(
        rename = "clientDisplayDescription",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_display_description: Option<String>,
}

/// SRP sub-payload; field presence depends on the stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SrpPayload {
    /// Handshake stage, see [`stage`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Client identity.
    #[serde(rename = "I", default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    /// Client public value, hex.
    #[serde(rename = "A", default, skip_serializing_if = "Option::is_none")]
    pub a: Option<String>,

    /// Server public value, hex.
    #[serde(rename = "B", default, skip_serializing_if = "Option::is_none")]
    pub b: Option<String>,

    /// Salt, hex.
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,

    /// Client proof M1, hex.
    #[serde(rename = "M", default, skip_serializing_if = "Option::is_none")]
    pub m: Option<String>,

    /// Server proof M2, hex.
    #[serde(rename = "M2", default, skip_serializing_if = "Option::is_none")]
    pub m2: Option<String>,

    /// Declared security level.
    #[serde(rename = "securityLevel", default, skip_serializing_if = "Option::is_none")]
    pub security_level: Option<i64>,
}

/// Stored-key challenge sub-payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KeyPayload {
    /// Identity the client claims.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Server challenge, decimal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sc: Option<String>,

    /// Client nonce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,

    /// Client response, hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cr: Option<String>,

    /// Server response, hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sr: Option<String>,

    /// Declared security level.
    #[serde(rename = "securityLevel", default, skip_serializing_if = "Option::is_none")]
    pub security_level: Option<i64>,
}

/// Encrypted RPC sub-payload; all fields base64.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JsonrpcPayload {
    /// CBC initialisation vector.
    pub iv: String,
    /// Ciphertext.
    pub message: String,
    /// SHA-1 authentication tag.
    pub hmac: String,
}

/// Error report carried in an `error` envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable numeric error code.
    pub code: i32,

    /// Human-oriented parameters for the client's message template.
    #[serde(rename = "messageParams", default, skip_serializing_if = "Vec::is_empty")]
    pub message_params: Vec<String>,
}

impl Envelope {
    /// Parse an envelope from a text frame.
    ///
    /// # Errors
    ///
    /// [`Error::Envelope`] when the text is not a JSON object with the
    /// expected shape. The caller answers with an `INVALID_MESSAGE` error
    /// envelope before closing.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Envelope(e.to_string()))
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Envelope(e.to_string()))
    }

    /// Build an error envelope.
    pub fn for_error(code: ErrorCode, params: Vec<String>, version: i32) -> Self {
        Self {
            protocol: PROTOCOL_ERROR.to_string(),
            version,
            error: Some(ErrorPayload { code: code.to_i32(), message_params: params }),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_envelope_roundtrip() {
        let text = r#"{
            "protocol": "setup",
            "version": 131073,
            "features": ["KPRPC_FEATURE_VERSION_1_6"],
            "srp": {"stage": "identifyToServer", "I": "alice", "A": "1a2b", "securityLevel": 2},
            "clientDisplayName": "Browser"
        }"#;

        let envelope = Envelope::decode(text).unwrap();
        assert_eq!(envelope.protocol, PROTOCOL_SETUP);
        assert_eq!(envelope.version, 131_073);
        let srp = envelope.srp.as_ref().unwrap();
        assert_eq!(srp.stage.as_deref(), Some(stage::IDENTIFY_TO_SERVER));
        assert_eq!(srp.identity.as_deref(), Some("alice"));
        assert_eq!(srp.a.as_deref(), Some("1a2b"));
        assert_eq!(srp.security_level, Some(2));

        let encoded = envelope.encode().unwrap();
        assert_eq!(Envelope::decode(&encoded).unwrap(), envelope);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let text = r#"{"protocol": "setup", "version": 1, "futureThing": {"x": 1}}"#;
        let envelope = Envelope::decode(text).unwrap();
        assert_eq!(envelope.protocol, PROTOCOL_SETUP);
    }

    #[test]
    fn test_absent_optionals_are_none_and_omitted() {
        let envelope = Envelope::decode(r#"{"protocol": "jsonrpc"}"#).unwrap();
        assert_eq!(envelope.version, 0);
        assert!(envelope.srp.is_none());
        assert!(envelope.key.is_none());
        assert!(envelope.features.is_none());

        let encoded = envelope.encode().unwrap();
        assert!(!encoded.contains("srp"));
        assert!(!encoded.contains("features"));
        assert!(!encoded.contains("clientDisplayName"));
    }

    #[test]
    fn test_wire_field_casing() {
        let envelope = Envelope {
            protocol: PROTOCOL_SETUP.to_string(),
            version: 1,
            srp: Some(SrpPayload {
                stage: Some(stage::IDENTIFY_TO_CLIENT.to_string()),
                identity: Some("alice".to_string()),
                m2: Some("ff".to_string()),
                security_level: Some(2),
                ..SrpPayload::default()
            }),
            client_display_name: Some("Browser".to_string()),
            ..Envelope::default()
        };

        let encoded = envelope.encode().unwrap();
        assert!(encoded.contains("\"I\":\"alice\""));
        assert!(encoded.contains("\"M2\":\"ff\""));
        assert!(encoded.contains("\"securityLevel\":2"));
        assert!(encoded.contains("\"clientDisplayName\":\"Browser\""));
    }

    #[test]
    fn test_error_envelope() {
        let envelope =
            Envelope::for_error(ErrorCode::VersionClientTooLow, vec!["131073".to_string()], 131_073);
        let encoded = envelope.encode().unwrap();
        assert!(encoded.contains("\"protocol\":\"error\""));
        assert!(encoded.contains("\"code\":4"));
        assert!(encoded.contains("\"messageParams\":[\"131073\"]"));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Envelope::decode("").is_err());
        assert!(Envelope::decode("not json").is_err());
        assert!(Envelope::decode("[1,2,3]").is_err());
        assert!(Envelope::decode(r#"{"version": 3}"#).is_err());
    }
}
