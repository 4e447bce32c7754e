// ============================================
// File: crates/veiltun-transport/src/traits.rs
// ============================================
//! # Transport Traits
//!
//! ## Creation Reason
//! The datagram loop is written against a trait so tests and alternative
//! sockets can stand in for the real UDP transport.
//!
//! ## Main Functionality
//! - `DatagramTransport`: datagram send/receive interface
//! - `PacketSource`: metadata about a received datagram
//!
//! ## ⚠️ Important Note for Next Developer
//! - Implementations must be Send + Sync for use in async contexts
//! - Buffer management is the caller's responsibility
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::Result;

// ============================================
// PacketSource
// ============================================

/// Metadata about the source of a received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketSource {
    /// Source address (IP and port).
    pub addr: SocketAddr,
    /// When the datagram was received.
    pub timestamp: Instant,
}

impl PacketSource {
    /// Creates a new `PacketSource` stamped now.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timestamp: Instant::now(),
        }
    }
}

// ============================================
// DatagramTransport Trait
// ============================================

/// Abstract interface for datagram-based transport.
///
/// # Example
/// ```ignore
/// async fn echo<T: DatagramTransport>(transport: &T) -> Result<()> {
///     let mut buf = [0u8; 1500];
///     let (len, source) = transport.recv(&mut buf).await?;
///     transport.send(&buf[..len], &source.addr).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Receives one datagram into `buf`.
    ///
    /// # Errors
    /// `ShuttingDown` after shutdown, `ReceiveFailed` on socket errors.
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, PacketSource)>;

    /// Sends one datagram to `dest`.
    ///
    /// # Errors
    /// `ShuttingDown` after shutdown, `SendFailed` on socket errors.
    async fn send(&self, buf: &[u8], dest: &SocketAddr) -> Result<usize>;

    /// Returns the local address this transport is bound to.
    ///
    /// # Errors
    /// Returns error if the address cannot be determined.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Marks the transport closed; later operations fail.
    ///
    /// # Errors
    /// Returns error if shutdown fails.
    async fn shutdown(&self) -> Result<()>;

    /// Returns `true` if the transport is still active.
    fn is_active(&self) -> bool;
}
