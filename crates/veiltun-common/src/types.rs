// ============================================
// File: crates/veiltun-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the identifiers that flow between the handshake, the
//! connection registry and the datagram path.
//!
//! ## Main Functionality
//! - `SessionId`: Random 16-byte identifier issued in AUTH_RESPONSE
//! - `UserId`: Identity returned by the credential resolver
//! - `ClientId`: The stream peer's socket address, the registry key
//!
//! ## Main Logical Flow
//! 1. `UserId` is produced when a credential is resolved
//! 2. `SessionId` is generated once the peer is authenticated
//! 3. The session key for the datagram channel is derived from `SessionId`
//!
//! ## ⚠️ Important Note for Next Developer
//! - SessionId feeds key derivation - always use the secure generator
//! - SessionId is zeroed on drop, so it is deliberately not `Copy`
//! - The base64 text form is what goes on the wire inside JSON payloads
//!
//! ## Last Modified
//! v0.1.0 - Initial identifier types

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::CommonError;

// ============================================
// Constants
// ============================================

/// Size of SessionId in bytes
pub const SESSION_ID_SIZE: usize = 16;

/// Identifies a connected peer by its control stream address.
///
/// Datagrams are matched to connections by sender address, so the peer
/// must send tunnel traffic from the same `ip:port` as its stream.
pub type ClientId = SocketAddr;

// ============================================
// SessionId
// ============================================

/// Unique identifier for an authenticated session.
///
/// # Security Properties
/// - Generated from a cryptographically secure RNG (128 bits)
/// - Zeroed on drop
/// - Debug output only shows a short prefix
///
/// # Example
/// ```
/// use veiltun_common::types::SessionId;
///
/// let session_id = SessionId::generate();
/// let restored = SessionId::from_bytes(session_id.as_bytes()).unwrap();
/// assert_eq!(session_id, restored);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Zeroize)]
pub struct SessionId([u8; SESSION_ID_SIZE]);

impl Drop for SessionId {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl SessionId {
    /// Creates a `SessionId` from raw bytes.
    ///
    /// Returns `None` unless `bytes` is exactly 16 bytes long.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let id: [u8; SESSION_ID_SIZE] = bytes.try_into().ok()?;
        Some(Self(id))
    }

    /// Generates a new random `SessionId`.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = [0u8; SESSION_ID_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut id);
        Self(id)
    }

    /// Returns the raw bytes of the session ID.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({}...)", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&BASE64.encode(self.0))
    }
}

impl FromStr for SessionId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = BASE64.decode(s)?;
        Self::from_bytes(&bytes)
            .ok_or_else(|| CommonError::invalid_length(SESSION_ID_SIZE, bytes.len()))
    }
}

impl Serialize for SessionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================
// UserId
// ============================================

/// Identity of an authenticated user, as returned by the identity resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a new `UserId`, rejecting blank identifiers.
    ///
    /// # Errors
    /// Returns `CommonError::InvalidInput` if `id` is empty or whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, CommonError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CommonError::invalid_input("user_id", "cannot be blank"));
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
