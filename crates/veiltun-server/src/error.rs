// ============================================
// File: crates/veiltun-server/src/error.rs
// ============================================
//! # Server Error Types
//!
//! ## Main Functionality
//! - `ServerError`: configuration, registry, startup and wrapped lower-layer errors
//! - `HandshakeError`: why a control connection failed before ESTABLISHED
//!
//! ## ⚠️ Important Note for Next Developer
//! - `HandshakeError::peer_message` is what the client sees; keep it free of
//!   internal detail and key material
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use veiltun_common::error::CommonError;
use veiltun_common::ClientId;
use veiltun_core::error::CoreError;
use veiltun_core::PacketType;
use veiltun_transport::error::TransportError;

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

// ============================================
// ServerError
// ============================================

/// Server error types.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration file could not be read or parsed.
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad {
        /// File path
        path: String,
        /// Why loading failed
        reason: String,
    },

    /// A configuration value is out of range.
    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid {
        /// Dotted field name
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Key file could not be read, parsed or written.
    #[error("Key file '{path}': {reason}")]
    KeyFile {
        /// File path
        path: String,
        /// What went wrong
        reason: String,
    },

    /// No connection is registered for this client.
    #[error("Connection not found: {0}")]
    ConnectionNotFound(ClientId),

    /// The registry is full.
    #[error("Capacity exceeded: max {limit} connections")]
    CapacityExceeded {
        /// Configured maximum
        limit: usize,
    },

    /// A connection is already registered for this client.
    #[error("Connection already registered: {0}")]
    AlreadyRegistered(ClientId),

    /// No tunnel address left to hand out.
    #[error("IP address pool exhausted")]
    IpPoolExhausted,

    /// Server failed to start.
    #[error("Server failed to start: {reason}")]
    StartupFailed {
        /// Why startup failed
        reason: String,
    },

    /// Server is shutting down.
    #[error("Server is shutting down")]
    ShuttingDown,

    /// Handshake failure.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Error from core crate.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Error from transport crate.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Creates a `ConfigLoad` error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `ConfigInvalid` error.
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `KeyFile` error.
    pub fn key_file(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::KeyFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `StartupFailed` error.
    pub fn startup_failed(reason: impl Into<String>) -> Self {
        Self::StartupFailed {
            reason: reason.into(),
        }
    }

    /// Returns `true` for configuration problems.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad { .. } | Self::ConfigInvalid { .. })
    }

    /// Returns `true` for registry outcomes that reject a single connection.
    #[must_use]
    pub const fn is_registry_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionNotFound(_) | Self::CapacityExceeded { .. } | Self::AlreadyRegistered(_)
        )
    }

    /// Returns `true` if the server cannot continue.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad { .. }
                | Self::ConfigInvalid { .. }
                | Self::KeyFile { .. }
                | Self::StartupFailed { .. }
        )
    }
}

// ============================================
// HandshakeError
// ============================================

/// Why a handshake failed. Every variant is fatal to the connection.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// A packet failed to parse or verify.
    #[error("Framing error: {0}")]
    Framing(#[source] CoreError),

    /// A valid packet of the wrong type for the current state.
    #[error("Unexpected packet type: expected {expected}, got {got}")]
    UnexpectedPacketType {
        /// Type the state machine was waiting for
        expected: PacketType,
        /// Type that arrived
        got: PacketType,
    },

    /// Credential missing, malformed or refused by the identity resolver.
    #[error("Authentication rejected: {reason}")]
    AuthenticationRejected {
        /// Why the credential was refused
        reason: String,
    },

    /// No packet arrived before the handshake deadline.
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// Peer closed the stream mid-handshake.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Server shutdown interrupted the handshake.
    #[error("Handshake cancelled by shutdown")]
    Cancelled,

    /// No tunnel address available for this client.
    #[error("IP address pool exhausted")]
    IpPoolExhausted,

    /// Stream I/O failure other than timeout or close.
    #[error("Transport error: {0}")]
    Transport(#[source] TransportError),

    /// Server-side failure (key derivation, serialization).
    #[error("Internal error: {reason}")]
    Internal {
        /// What failed
        reason: String,
    },
}

impl HandshakeError {
    /// Creates an `AuthenticationRejected` error.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::AuthenticationRejected {
            reason: reason.into(),
        }
    }

    /// Creates an `Internal` error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Text sent to the peer in the ERROR packet.
    #[must_use]
    pub fn peer_message(&self) -> String {
        match self {
            Self::Framing(_) => "invalid packet".to_string(),
            Self::UnexpectedPacketType { expected, got } => {
                format!("unexpected packet type: expected {expected}, got {got}")
            }
            Self::AuthenticationRejected { .. } => "authentication rejected".to_string(),
            Self::HandshakeTimeout => "handshake timeout".to_string(),
            Self::ConnectionClosed => "connection closed".to_string(),
            Self::Cancelled => "server shutting down".to_string(),
            Self::IpPoolExhausted => "no tunnel address available".to_string(),
            Self::Transport(_) | Self::Internal { .. } => "internal server error".to_string(),
        }
    }

    /// Returns `true` if the peer caused the failure.
    #[must_use]
    pub const fn is_client_fault(&self) -> bool {
        matches!(
            self,
            Self::Framing(_)
                | Self::UnexpectedPacketType { .. }
                | Self::AuthenticationRejected { .. }
                | Self::HandshakeTimeout
                | Self::ConnectionClosed
        )
    }
}

impl From<CoreError> for HandshakeError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnexpectedPacketType { expected, got } => {
                Self::UnexpectedPacketType { expected, got }
            }
            e if e.is_framing_error() => Self::Framing(e),
            e => Self::internal(e.to_string()),
        }
    }
}

impl From<TransportError> for HandshakeError {
    fn from(err: TransportError) -> Self {
        if err.is_timeout() {
            Self::HandshakeTimeout
        } else if err.is_closed() {
            Self::ConnectionClosed
        } else {
            Self::Transport(err)
        }
    }
}
