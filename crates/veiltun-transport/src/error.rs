// ============================================
// File: crates/veiltun-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! Defines error types for socket setup, datagram I/O and stream
//! byte accumulation.
//!
//! ## Error Categories
//! 1. **Setup Errors**: bind failures, bad addresses
//! 2. **Datagram Errors**: UDP send/receive failures
//! 3. **Stream Errors**: read deadline passed, peer closed mid-frame
//!
//! ## ⚠️ Important Note for Next Developer
//! - `UnexpectedEof { received: 0 }` is a clean close between frames
//! - Timeouts are reported, never retried here; the caller decides
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use veiltun_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ============================================
// TransportError
// ============================================

/// Transport layer error types.
#[derive(Error, Debug)]
pub enum TransportError {
    // ========================================
    // Setup Errors
    // ========================================

    /// Failed to bind to address.
    #[error("Failed to bind to {addr}: {reason}")]
    BindFailed {
        /// Address we tried to bind to
        addr: SocketAddr,
        /// Why binding failed
        reason: String,
    },

    /// Address already in use.
    #[error("Address {addr} already in use")]
    AddressInUse {
        /// The address that's in use
        addr: SocketAddr,
    },

    /// Invalid socket address.
    #[error("Invalid address: {addr}")]
    InvalidAddress {
        /// The invalid address string
        addr: String,
    },

    // ========================================
    // Datagram Errors
    // ========================================

    /// Send operation failed.
    #[error("Failed to send to {dest}: {reason}")]
    SendFailed {
        /// Destination address
        dest: SocketAddr,
        /// Why send failed
        reason: String,
    },

    /// Receive operation failed.
    #[error("Failed to receive: {reason}")]
    ReceiveFailed {
        /// Why receive failed
        reason: String,
    },

    // ========================================
    // Stream Errors
    // ========================================

    /// Deadline passed before enough bytes arrived.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// What operation timed out
        operation: String,
    },

    /// Peer closed the stream before `expected` bytes were buffered.
    #[error("Stream closed after {received} of {expected} bytes")]
    UnexpectedEof {
        /// Bytes the reader was waiting for
        expected: usize,
        /// Bytes buffered when the stream closed
        received: usize,
    },

    /// Transport is shutting down.
    #[error("Transport is shutting down")]
    ShuttingDown,

    // ========================================
    // Wrapped Errors
    // ========================================

    /// I/O error from the system.
    #[error("I/O error: {context}")]
    Io {
        /// What was happening when the error occurred
        context: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl TransportError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `BindFailed` error.
    pub fn bind_failed(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindFailed {
            addr,
            reason: reason.into(),
        }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this error is transient and retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ),
            Self::SendFailed { .. } | Self::ReceiveFailed { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if a read deadline passed.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if the peer closed the stream, cleanly or mid-frame.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self {
            Self::UnexpectedEof { .. } => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// Returns `true` if the peer closed exactly on a frame boundary.
    #[must_use]
    pub const fn is_clean_close(&self) -> bool {
        matches!(self, Self::UnexpectedEof { received: 0, .. })
    }
}

// ============================================
// Error Conversions
// ============================================

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            context: "unspecified I/O operation".into(),
            source: err,
        }
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
        let err = TransportError::bind_failed("127.0.0.1:8080".parse().unwrap(), "address in use");
        assert!(err.to_string().contains("127.0.0.1:8080"));
        assert!(err.to_string().contains("address in use"));
    }

    #[test]
    fn test_eof_classification() {
        let clean = TransportError::UnexpectedEof {
            expected: 16,
            received: 0,
        };
        assert!(clean.is_closed());
        assert!(clean.is_clean_close());

        let mid = TransportError::UnexpectedEof {
            expected: 16,
            received: 5,
        };
        assert!(mid.is_closed());
        assert!(!mid.is_clean_close());

        let reset: TransportError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert!(reset.is_closed());
    }

    #[test]
    fn test_retryable() {
        let would_block: TransportError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(would_block.is_retryable());
        assert!(!TransportError::timeout("read").is_retryable());
        assert!(TransportError::timeout("read").is_timeout());
    }
}
