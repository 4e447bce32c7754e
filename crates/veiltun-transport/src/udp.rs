// ============================================
// File: crates/veiltun-transport/src/udp.rs
// ============================================
//! # UDP Transport Implementation
//!
//! ## Creation Reason
//! Carries the tunnel's encrypted datagrams, wrapping Tokio's UDP socket
//! with the `DatagramTransport` trait.
//!
//! ## Main Functionality
//! - `UdpTransport`: bind, receive, send, shut down
//! - Optional socket buffer sizing through `SocketOptions`
//!
//! ## ⚠️ Important Note for Next Developer
//! - UDP is connectionless - no guaranteed delivery
//! - Maximum UDP payload is ~65507 bytes; larger blobs are rejected by the OS
//! - Peers are identified by source address, so NAT rebinding breaks a session
//!
//! ## Last Modified
//! v0.1.0 - Initial UDP transport implementation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use socket2::{Protocol, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

use crate::error::{Result, TransportError};
use crate::socket::{bind_socket, parse_addr, SocketOptions};
use crate::traits::{DatagramTransport, PacketSource};

/// UDP-based datagram transport.
///
/// # Example
/// ```ignore
/// use veiltun_transport::{DatagramTransport, UdpTransport};
///
/// let transport = UdpTransport::bind("0.0.0.0:7001").await?;
/// let mut buf = [0u8; 2048];
/// let (len, source) = transport.recv(&mut buf).await?;
/// transport.send(&buf[..len], &source.addr).await?;
/// ```
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    shutdown: AtomicBool,
}

impl UdpTransport {
    /// Binds to a textual address such as `"0.0.0.0:7001"`.
    ///
    /// # Errors
    /// `InvalidAddress`, `AddressInUse` or `BindFailed`.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self> {
        Self::bind_with(parse_addr(addr.as_ref())?, SocketOptions::default()).await
    }

    /// Binds to `addr` with the given socket options.
    ///
    /// # Errors
    /// `AddressInUse` or `BindFailed` if the socket cannot be bound.
    pub async fn bind_with(addr: SocketAddr, options: SocketOptions) -> Result<Self> {
        debug!(%addr, ?options, "Binding UDP transport");

        let socket = bind_socket(addr, Type::DGRAM, Protocol::UDP, options)?;
        let socket = UdpSocket::from_std(socket.into())
            .map_err(|e| TransportError::io("converting to Tokio socket", e))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| TransportError::io("getting local address", e))?;

        info!(%local_addr, "UDP transport bound");

        Ok(Self {
            socket,
            local_addr,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Checks if the transport has been shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, PacketSource)> {
        if self.is_shutdown() {
            return Err(TransportError::ShuttingDown);
        }

        let (len, addr) = self
            .socket
            .recv_from(buf)
            .await
            .map_err(|e| TransportError::ReceiveFailed {
                reason: e.to_string(),
            })?;

        trace!(len, %addr, "Datagram received");
        Ok((len, PacketSource::new(addr)))
    }

    async fn send(&self, buf: &[u8], dest: &SocketAddr) -> Result<usize> {
        if self.is_shutdown() {
            return Err(TransportError::ShuttingDown);
        }

        let len = self
            .socket
            .send_to(buf, dest)
            .await
            .map_err(|e| TransportError::SendFailed {
                dest: *dest,
                reason: e.to_string(),
            })?;

        trace!(len, %dest, "Datagram sent");
        Ok(len)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn shutdown(&self) -> Result<()> {
        debug!(local_addr = %self.local_addr, "Shutting down UDP transport");
        // The descriptor closes when the transport is dropped.
        self.shutdown.store(true, Ordering::Release);
        Ok(())
    }

    fn is_active(&self) -> bool {
        !self.is_shutdown()
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_addr", &self.local_addr)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
