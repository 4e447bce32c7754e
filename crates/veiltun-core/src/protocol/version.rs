// ============================================
// File: crates/veiltun-core/src/protocol/version.rs
// ============================================
//! # Protocol Versioning
//!
//! ## Creation Reason
//! The first header byte carries the protocol version. A mismatch is
//! rejected before the signature is even looked at.
//!
//! ## Version History
//! | Version | Description |
//! |---------|-------------|
//! | 0x01    | Initial protocol: HMAC-signed control packets, JSON handshake |
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALWAYS increment version for wire format changes
//! - Document all versions in version history
//!
//! ## Last Modified
//! v0.1.0 - Initial version definitions

use std::fmt;

use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Protocol version identifier.
///
/// # Example
/// ```
/// use veiltun_core::protocol::ProtocolVersion;
///
/// assert!(ProtocolVersion::current().is_supported());
/// assert!(!ProtocolVersion::new(2).is_supported());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(u8);

impl ProtocolVersion {
    /// Creates a protocol version from its wire byte.
    #[must_use]
    pub const fn new(version: u8) -> Self {
        Self(version)
    }

    /// Returns the current protocol version.
    #[must_use]
    pub const fn current() -> Self {
        Self(PROTOCOL_VERSION)
    }

    /// Returns the raw version byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Only an exact match is accepted.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        self.0 == PROTOCOL_VERSION
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u8> for ProtocolVersion {
    fn from(v: u8) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_is_supported() {
        assert!(ProtocolVersion::current().is_supported());
        assert_eq!(ProtocolVersion::default().as_u8(), 0x01);
    }

    #[test]
    fn test_other_versions_rejected() {
        for v in [0u8, 2, 0x10, 0xFF] {
            assert!(!ProtocolVersion::from(v).is_supported());
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ProtocolVersion::current().to_string(), "v1");
    }
}
