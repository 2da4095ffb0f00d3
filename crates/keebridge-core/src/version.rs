//! Protocol version token and capability feature sets.

use std::fmt;

/// Feature flags every compatible client must advertise before a version
/// mismatch is tolerated.
pub const REQUIRED_CLIENT_FEATURES: &[&str] = &["KPRPC_FEATURE_VERSION_1_6"];

/// Feature flags this server advertises during pairing.
pub const SERVER_FEATURES: &[&str] = &[
    "KPRPC_FEATURE_VERSION_1_6",
    "KPRPC_FEATURE_WARN_USER_WHEN_FEATURE_MISSING",
    "KPRPC_GENERAL_CLIENTS",
];

/// The plugin's semantic version, fixed at startup and passed into each
/// connection. The wire token packs it as the little-endian bytes
/// `[build, minor, major, 0]` read as a signed 32-bit integer, which is
/// the sole protocol-compatibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Build / patch version.
    pub build: u8,
}

impl ProtocolVersion {
    /// Construct from semantic version parts.
    pub const fn new(major: u8, minor: u8, build: u8) -> Self {
        Self { major, minor, build }
    }

    /// The version this crate was built as.
    pub fn current() -> Self {
        // CARGO_PKG_* are compile-time constants; failures here would mean
        // a malformed workspace manifest.
        let parse = |s: &str| s.parse::<u8>().unwrap_or(0);
        Self {
            major: parse(env!("CARGO_PKG_VERSION_MAJOR")),
            minor: parse(env!("CARGO_PKG_VERSION_MINOR")),
            build: parse(env!("CARGO_PKG_VERSION_PATCH")),
        }
    }

    /// The signed 32-bit wire token.
    pub fn token(self) -> i32 {
        i32::from_le_bytes([self.build, self.minor, self.major, 0])
    }

    /// Decode a wire token back into version parts.
    pub fn from_token(token: i32) -> Self {
        let [build, minor, major, _] = token.to_le_bytes();
        Self { major, minor, build }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// Whether `advertised` covers every required feature.
pub fn covers_required(advertised: &[String], required: &[&str]) -> bool {
    required.iter().all(|needed| advertised.iter().any(|have| have == needed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_layout() {
        // 2.0.1 -> bytes [1, 0, 2, 0] little-endian
        let version = ProtocolVersion::new(2, 0, 1);
        assert_eq!(version.token(), 0x0002_0001);
        assert_eq!(ProtocolVersion::from_token(0x0002_0001), version);
    }

    #[test]
    fn test_token_orders_by_major_minor_build() {
        let older = ProtocolVersion::new(1, 9, 255).token();
        let newer = ProtocolVersion::new(2, 0, 0).token();
        assert!(older < newer);
        assert!(ProtocolVersion::new(2, 0, 0).token() < ProtocolVersion::new(2, 0, 1).token());
        assert!(ProtocolVersion::new(2, 0, 9).token() < ProtocolVersion::new(2, 1, 0).token());
    }

    #[test]
    fn test_display() {
        assert_eq!(ProtocolVersion::new(2, 0, 1).to_string(), "2.0.1");
    }

    #[test]
    fn test_covers_required() {
        let have = vec!["KPRPC_FEATURE_VERSION_1_6".to_string(), "EXTRA".to_string()];
        assert!(covers_required(&have, REQUIRED_CLIENT_FEATURES));
        assert!(!covers_required(&[], REQUIRED_CLIENT_FEATURES));
        assert!(!covers_required(&["EXTRA".to_string()], REQUIRED_CLIENT_FEATURES));
    }
}
