// ============================================
// File: crates/veiltun-server/src/handlers/sink.rs
// ============================================
//! # Payload Sinks
//!
//! ## Creation Reason
//! Decrypted tunnel payload leaves the endpoint here. Forwarding it onto
//! a network is someone else's job, so the server only knows the trait.
//!
//! ## Main Functionality
//! - `PayloadSink`: receives `(client, payload)` after decryption
//! - `LoggingSink`: counts and trace-logs, drops the payload
//! - `ChannelSink`: pushes into a bounded mpsc channel
//!
//! ## ⚠️ Important Note for Next Developer
//! - Each call runs on its own spawned task; a slow sink never stalls the
//!   datagram loop, but it also means calls may complete out of order
//!
//! ## Last Modified
//! v0.1.0 - Initial payload sinks

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Destination for decrypted tunnel payload.
#[async_trait]
pub trait PayloadSink: Send + Sync {
    /// Handles one payload from `client`.
    async fn on_tunnel_payload(&self, client: SocketAddr, payload: Bytes);
}

// ============================================
// LoggingSink
// ============================================

/// Logs and counts payloads without forwarding them.
#[derive(Debug, Default)]
pub struct LoggingSink {
    payloads: AtomicU64,
    bytes: AtomicU64,
}

impl LoggingSink {
    /// Creates a sink with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads seen.
    #[must_use]
    pub fn payloads(&self) -> u64 {
        self.payloads.load(Ordering::Relaxed)
    }

    /// Payload bytes seen.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PayloadSink for LoggingSink {
    async fn on_tunnel_payload(&self, client: SocketAddr, payload: Bytes) {
        self.payloads.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(payload.len() as u64, Ordering::Relaxed);
        trace!(client = %client, len = payload.len(), "Tunnel payload");
    }
}

// ============================================
// ChannelSink
// ============================================

/// Forwards payloads into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<(SocketAddr, Bytes)>,
}

impl ChannelSink {
    /// Creates a sink and the receiver that drains it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<(SocketAddr, Bytes)>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PayloadSink for ChannelSink {
    async fn on_tunnel_payload(&self, client: SocketAddr, payload: Bytes) {
        if self.tx.send((client, payload)).await.is_err() {
            debug!(client = %client, "Payload receiver gone, dropping payload");
        }
    }
}
