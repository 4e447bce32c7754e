// ============================================
// File: crates/veiltun-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines error types specific to packet framing and cryptographic
//! operations in the VeilTun core crate.
//!
//! ## Main Functionality
//! - `CoreError`: Primary error enum for core operations
//! - Classification helpers used by the server to pick a reaction
//!
//! ## Error Categories
//! 1. **Framing Errors**: version, size, truncation, signature, type byte
//! 2. **Crypto Errors**: key setup, derivation, datagram authentication
//! 3. **Payload Errors**: JSON shape, packet type not expected in this state
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material in error messages
//! - Framing errors are fatal to the packet; crypto errors are per datagram
//! - All errors should be loggable without leaking secrets
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use veiltun_common::error::CommonError;

use crate::protocol::PacketType;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CoreError
// ============================================

/// Core error types for framing and cryptographic operations.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Framing Errors
    // ========================================

    /// Protocol version byte does not match.
    #[error("Unsupported protocol version: {got}, expected {expected}")]
    UnsupportedVersion {
        /// Version received
        got: u8,
        /// Version expected
        expected: u8,
    },

    /// Declared or supplied payload exceeds the maximum.
    #[error("Payload too large: max {max} bytes, got {actual}")]
    PayloadTooLarge {
        /// Maximum allowed size
        max: usize,
        /// Size declared or supplied
        actual: usize,
    },

    /// Fewer (or more) bytes than the header declared.
    #[error("Truncated packet: expected {expected} bytes, got {actual}")]
    TruncatedPacket {
        /// Bytes required by the header
        expected: usize,
        /// Bytes actually supplied
        actual: usize,
    },

    /// Packet signature did not verify.
    #[error("Invalid packet signature")]
    InvalidSignature,

    /// Signed packet carries a type byte this version does not know.
    #[error("Unknown packet type: 0x{0:02x}")]
    UnknownPacketType(u8),

    // ========================================
    // Payload Errors
    // ========================================

    /// Payload body is not the expected JSON object.
    #[error("Malformed payload: {reason}")]
    MalformedPayload {
        /// What's wrong with the payload
        reason: String,
    },

    /// A valid packet of the wrong type for the current step.
    #[error("Unexpected packet type: expected {expected}, got {got}")]
    UnexpectedPacketType {
        /// Type the receiver was waiting for
        expected: PacketType,
        /// Type that arrived
        got: PacketType,
    },

    // ========================================
    // Cryptographic Errors
    // ========================================

    /// Engine could not be initialised.
    #[error("Crypto initialisation failed: {reason}")]
    CryptoInit {
        /// Why initialisation failed
        reason: String,
    },

    /// Key derivation failed.
    #[error("Key derivation failed: {reason}")]
    KeyDerivation {
        /// Why derivation failed
        reason: String,
    },

    /// Encryption operation failed.
    #[error("Encryption failed: {context}")]
    Encryption {
        /// What was being encrypted
        context: String,
    },

    /// AEAD tag did not verify.
    #[error("Decryption failed: authentication error")]
    AuthenticationFailure,

    /// Blob too short to contain nonce and tag.
    #[error("Malformed ciphertext: need at least {min} bytes, got {actual}")]
    MalformedInput {
        /// Minimum blob length
        min: usize,
        /// Actual blob length
        actual: usize,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `MalformedPayload` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            reason: reason.into(),
        }
    }

    /// Creates a `CryptoInit` error.
    pub fn crypto_init(reason: impl Into<String>) -> Self {
        Self::CryptoInit {
            reason: reason.into(),
        }
    }

    /// Creates a `KeyDerivation` error.
    pub fn key_derivation(reason: impl Into<String>) -> Self {
        Self::KeyDerivation {
            reason: reason.into(),
        }
    }

    /// Creates a `TruncatedPacket` error.
    #[must_use]
    pub const fn truncated(expected: usize, actual: usize) -> Self {
        Self::TruncatedPacket { expected, actual }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this error came from parsing or verifying a packet.
    ///
    /// Framing errors are fatal to the packet, and during the handshake
    /// fatal to the connection.
    #[must_use]
    pub const fn is_framing_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedVersion { .. }
                | Self::PayloadTooLarge { .. }
                | Self::TruncatedPacket { .. }
                | Self::InvalidSignature
                | Self::UnknownPacketType(_)
                | Self::MalformedPayload { .. }
        )
    }

    /// Returns `true` if this is a cryptographic error.
    #[must_use]
    pub const fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            Self::CryptoInit { .. }
                | Self::KeyDerivation { .. }
                | Self::Encryption { .. }
                | Self::AuthenticationFailure
                | Self::MalformedInput { .. }
        )
    }

    /// Returns `true` if this error might indicate tampering.
    #[must_use]
    pub const fn is_suspicious(&self) -> bool {
        matches!(
            self,
            Self::InvalidSignature | Self::AuthenticationFailure | Self::UnknownPacketType(_)
        )
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::truncated(48, 20);
        assert!(err.to_string().contains("48"));
        assert!(err.to_string().contains("20"));

        let err = CoreError::UnexpectedPacketType {
            expected: PacketType::AuthRequest,
            got: PacketType::KeepAlive,
        };
        assert!(err.to_string().contains("AUTH_REQUEST"));
        assert!(err.to_string().contains("KEEP_ALIVE"));
    }

    #[test]
    fn test_error_classification() {
        assert!(CoreError::InvalidSignature.is_framing_error());
        assert!(CoreError::InvalidSignature.is_suspicious());
        assert!(!CoreError::InvalidSignature.is_crypto_error());

        assert!(CoreError::AuthenticationFailure.is_crypto_error());
        assert!(!CoreError::AuthenticationFailure.is_framing_error());

        assert!(CoreError::malformed("missing field").is_framing_error());
    }

    #[test]
    fn test_common_error_conversion() {
        let common = CommonError::invalid_input("field", "bad value");
        let core: CoreError = common.into();
        assert!(matches!(core, CoreError::Common(_)));
    }
}
