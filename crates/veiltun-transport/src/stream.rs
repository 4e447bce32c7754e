// ============================================
// File: crates/veiltun-transport/src/stream.rs
// ============================================
//! # Stream Transport
//!
//! ## Creation Reason
//! The control channel runs over TCP. Packets arrive as a byte stream, so
//! the handshake needs "give me exactly N bytes, or fail by this deadline".
//!
//! ## Main Functionality
//! - `StreamListener`: TCP accept loop socket
//! - `FrameReader`: buffered exact-length reads with an optional deadline
//!
//! ## Main Logical Flow
//! 1. `fill_by(16, deadline)`, then `peek()` at the header
//! 2. Header tells the caller the body length
//! 3. `fill_by(16 + len, deadline)`, then `read_exact_by` the whole frame
//!
//! ## ⚠️ Important Note for Next Developer
//! - Bytes read past the requested length stay buffered for the next call
//! - A deadline applies to the whole call, not to each underlying read
//! - EOF before N bytes is `UnexpectedEof`; `received == 0` means a clean close
//!
//! ## Last Modified
//! v0.1.0 - Initial stream transport

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use socket2::{Protocol, Type};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::socket::{bind_socket, parse_addr, SocketOptions};

/// Pending-connection queue length.
const LISTEN_BACKLOG: i32 = 1024;

/// Initial read buffer capacity.
const READ_BUFFER_CAPACITY: usize = 4096;

// ============================================
// StreamListener
// ============================================

/// TCP listener for the control channel.
#[derive(Debug)]
pub struct StreamListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl StreamListener {
    /// Binds to a textual address such as `"0.0.0.0:7000"`.
    ///
    /// # Errors
    /// `InvalidAddress`, `AddressInUse` or `BindFailed`.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self> {
        Self::bind_addr(parse_addr(addr.as_ref())?).await
    }

    /// Binds to `addr` and starts listening.
    ///
    /// # Errors
    /// `AddressInUse` or `BindFailed` if the socket cannot be bound.
    pub async fn bind_addr(addr: SocketAddr) -> Result<Self> {
        debug!(%addr, "Binding stream listener");

        let socket = bind_socket(addr, Type::STREAM, Protocol::TCP, SocketOptions::default())?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| TransportError::bind_failed(addr, e.to_string()))?;

        let listener = TcpListener::from_std(socket.into())
            .map_err(|e| TransportError::io("converting to Tokio listener", e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::io("getting local address", e))?;

        info!(%local_addr, "Stream listener bound");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Waits for the next inbound connection.
    ///
    /// # Errors
    /// Returns `Io` if accept fails.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::io("accepting stream", e))?;

        // Control packets are small; don't let Nagle delay them.
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
        }

        Ok((stream, peer))
    }

    /// Returns the bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

// ============================================
// FrameReader
// ============================================

/// Accumulates bytes from a stream until a requested length is available.
///
/// # Example
/// ```ignore
/// let mut reader = FrameReader::new(read_half);
/// let deadline = Instant::now() + Duration::from_secs(30);
/// let header = reader.read_exact_by(16, Some(deadline)).await?;
/// ```
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps a byte stream.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
        }
    }

    /// Returns exactly `n` bytes, reading more from the stream as needed.
    ///
    /// With `Some(deadline)`, the call fails with `Timeout` once the deadline
    /// passes; bytes received so far stay buffered.
    ///
    /// # Errors
    /// - `Timeout` if the deadline passes first
    /// - `UnexpectedEof` if the stream ends first
    /// - `Io` on read errors
    pub async fn read_exact_by(&mut self, n: usize, deadline: Option<Instant>) -> Result<Bytes> {
        self.fill_by(n, deadline).await?;
        Ok(self.buf.split_to(n).freeze())
    }

    /// Waits until at least `n` bytes are buffered without consuming any.
    ///
    /// Cancel-safe: dropping the future loses nothing, so callers that
    /// `fill_by` a whole frame before consuming it can sit in a
    /// `tokio::select!`.
    ///
    /// # Errors
    /// Same as [`FrameReader::read_exact_by`].
    pub async fn fill_by(&mut self, n: usize, deadline: Option<Instant>) -> Result<()> {
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.fill(n))
                .await
                .map_err(|_| TransportError::timeout(format!("reading {n} bytes")))?,
            None => self.fill(n).await,
        }
    }

    /// Bytes buffered but not yet returned.
    #[must_use]
    pub fn peek(&self) -> &[u8] {
        &self.buf
    }

    /// Number of bytes buffered but not yet returned.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Unwraps the underlying stream, discarding buffered bytes.
    pub fn into_inner(self) -> R {
        self.inner
    }

    async fn fill(&mut self, n: usize) -> Result<()> {
        if self.buf.capacity() < n {
            self.buf.reserve(n - self.buf.len());
        }
        while self.buf.len() < n {
            let read = self
                .inner
                .read_buf(&mut self.buf)
                .await
                .map_err(|e| TransportError::io("reading stream", e))?;
            if read == 0 {
                return Err(TransportError::UnexpectedEof {
                    expected: n,
                    received: self.buf.len(),
                });
            }
        }
        Ok(())
    }
}

// ============================================
// Tests
// ============================================
