//! The persisted key container and its legacy XML encoding.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A paired client's long-term key record.
///
/// Serialized as the legacy `KeyContainerClass` XML document; the element
/// names and their order are a compatibility anchor for clients upgrading
/// in place, so the field order here is load-bearing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "KeyContainerClass")]
pub struct KeyContainer {
    /// The shared session key, 64 lowercase hex chars (32 bytes).
    #[serde(rename = "Key")]
    pub key: String,

    /// Unix seconds UTC past which the container is invalid.
    #[serde(rename = "AuthExpires")]
    pub auth_expires: i64,

    /// Identity the client claims on reconnection.
    #[serde(rename = "Username")]
    pub username: String,

    /// Label the client showed at pairing time.
    #[serde(rename = "ClientName")]
    pub client_name: String,
}

impl KeyContainer {
    /// Serialize to the legacy XML document.
    pub fn to_xml(&self) -> Result<String> {
        quick_xml::se::to_string(self).map_err(|e| Error::Serialize(e.to_string()))
    }

    /// Parse from the legacy XML document.
    pub fn from_xml(xml: &str) -> Result<Self> {
        quick_xml::de::from_str(xml).map_err(|e| Error::Serialize(e.to_string()))
    }

    /// Whether the container has expired at `now` (Unix seconds UTC).
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.auth_expires <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> KeyContainer {
        KeyContainer {
            key: "5f".repeat(32),
            auth_expires: 1_900_000_000,
            username: "alice".to_string(),
            client_name: "Browser".to_string(),
        }
    }

    #[test]
    fn test_xml_roundtrip() {
        let original = container();
        let xml = original.to_xml().unwrap();
        assert_eq!(KeyContainer::from_xml(&xml).unwrap(), original);
    }

    #[test]
    fn test_xml_element_order() {
        let xml = container().to_xml().unwrap();
        let key_at = xml.find("<Key>").unwrap();
        let expires_at = xml.find("<AuthExpires>").unwrap();
        let username_at = xml.find("<Username>").unwrap();
        let client_at = xml.find("<ClientName>").unwrap();
        assert!(key_at < expires_at && expires_at < username_at && username_at < client_at);
        assert!(xml.starts_with("<KeyContainerClass>"));
    }

    #[test]
    fn test_legacy_document_parses() {
        let xml = "<KeyContainerClass><Key>aa</Key><AuthExpires>123</AuthExpires>\
                   <Username>bob</Username><ClientName>Kee</ClientName></KeyContainerClass>";
        let parsed = KeyContainer::from_xml(xml).unwrap();
        assert_eq!(parsed.username, "bob");
        assert_eq!(parsed.auth_expires, 123);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(KeyContainer::from_xml("not xml at all").is_err());
        assert!(KeyContainer::from_xml("<KeyContainerClass></KeyContainerClass>").is_err());
    }

    #[test]
    fn test_expiry() {
        let c = container();
        assert!(!c.is_expired_at(1_899_999_999));
        assert!(c.is_expired_at(1_900_000_000));
        assert!(c.is_expired_at(2_000_000_000));
    }
}
