// ============================================
// File: crates/veiltun-server/src/handlers/datagram.rs
// ============================================
//! # Datagram Handler
//!
//! ## Creation Reason
//! Handles the data channel: every UDP datagram is one encrypted blob
//! under the sender's session key.
//!
//! ## Packet Processing
//!
//! ### Client → Sink
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  1. Receive datagram                                        │
//! │     ┌──────────┬──────────┬──────────────────────────┐     │
//! │     │ Nonce 12 │ Tag 16   │ Ciphertext               │     │
//! │     └──────────┴──────────┴──────────────────────────┘     │
//! │                                                             │
//! │  2. Lookup connection by source address                     │
//! │     (absent → drop, unknown sender)                         │
//! │                                                             │
//! │  3. Decrypt with the connection's session cipher            │
//! │     (failure → drop, connection untouched)                  │
//! │                                                             │
//! │  4. Record activity, hand payload to the sink (spawned)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Server → Client
//! ```text
//! lookup(client) → encrypt(session cipher) → UDP send → record activity
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Critical path: no awaits between receive and spawn
//! - A failed decrypt must not touch the connection, or a spoofer could
//!   keep an idle session alive
//! - Dropped datagrams are logged at debug only; they are cheap to forge
//!
//! ## Last Modified
//! v0.1.0 - Initial datagram handler

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use veiltun_common::ClientId;
use veiltun_core::CoreError;

use crate::error::Result;
use crate::handlers::sink::PayloadSink;
use crate::services::registry::ConnectionRegistry;
use crate::stats::ServerStats;

/// What happened to an inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatagramDisposition {
    /// Decrypted; payload handed to the sink.
    Delivered {
        /// Plaintext length
        len: usize,
    },
    /// No connection registered at the source address.
    UnknownSender,
    /// The blob did not authenticate under the session key.
    DecryptFailed,
}

/// Decrypts inbound datagrams and encrypts outbound ones.
pub struct DatagramHandler {
    registry: Arc<ConnectionRegistry>,
    sink: Arc<dyn PayloadSink>,
    stats: Arc<ServerStats>,
}

impl DatagramHandler {
    /// Creates a handler.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        sink: Arc<dyn PayloadSink>,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            registry,
            sink,
            stats,
        }
    }

    /// Processes one inbound datagram from `source`.
    ///
    /// Must be called from within a Tokio runtime; the sink hand-off is
    /// spawned.
    pub fn handle_inbound(&self, source: SocketAddr, data: &[u8]) -> DatagramDisposition {
        self.stats.record_datagram_received();

        let Some(connection) = self.registry.get(&source) else {
            self.stats.record_unknown_sender();
            debug!(source = %source, len = data.len(), "Datagram from unknown sender dropped");
            return DatagramDisposition::UnknownSender;
        };

        let payload = match connection.cipher().decrypt(data) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.record_decrypt_failure();
                debug!(
                    source = %source,
                    len = data.len(),
                    suspicious = e.is_suspicious(),
                    error = %e,
                    "Datagram failed to decrypt"
                );
                return DatagramDisposition::DecryptFailed;
            }
        };

        let len = payload.len();
        connection.record_activity(len as u64, 0);
        trace!(client = %source, len, "Datagram decrypted");

        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            sink.on_tunnel_payload(source, Bytes::from(payload)).await;
        });

        DatagramDisposition::Delivered { len }
    }

    /// Encrypts `payload` for `client_id` and records it as sent.
    ///
    /// # Errors
    /// `ConnectionNotFound` if the client is not registered, `Core` if
    /// encryption fails.
    pub fn seal_outbound(&self, client_id: &ClientId, payload: &[u8]) -> Result<Vec<u8>> {
        let connection = self.registry.lookup(client_id)?;
        let blob = connection
            .cipher()
            .encrypt(payload)
            .map_err(|e: CoreError| {
                debug!(client = %client_id, error = %e, "Datagram encryption failed");
                e
            })?;
        connection.record_activity(0, payload.len() as u64);
        self.stats.record_datagram_sent();
        Ok(blob)
    }
}

impl std::fmt::Debug for DatagramHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramHandler")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use veiltun_common::{SessionId, UserId};
    use veiltun_core::{CryptoEngine, TunnelCipher};

    use crate::error::ServerError;
    use crate::handlers::sink::ChannelSink;
    use crate::services::ip_pool::IpPoolService;
    use crate::services::registry::Connection;

    struct Fixture {
        handler: DatagramHandler,
        registry: Arc<ConnectionRegistry>,
        stats: Arc<ServerStats>,
        rx: tokio::sync::mpsc::Receiver<(SocketAddr, Bytes)>,
        client_cipher: TunnelCipher,
        crypto: CryptoEngine,
        _pool: Arc<IpPoolService>,
    }

    fn client() -> SocketAddr {
        "127.0.0.1:41000".parse().unwrap()
    }

    fn fixture() -> Fixture {
        let crypto = CryptoEngine::generate().unwrap();
        let pool = Arc::new(
            IpPoolService::new("10.8.0.0/24".parse().unwrap(), Ipv4Addr::new(10, 8, 0, 1)).unwrap(),
        );
        let registry = Arc::new(ConnectionRegistry::new(4));
        let stats = Arc::new(ServerStats::default());
        let (sink, rx) = ChannelSink::new(8);

        let session_id = SessionId::generate();
        let connection = Connection::new(
            client(),
            UserId::new("alice").unwrap(),
            session_id.clone(),
            pool.lease().unwrap(),
            crypto.session_cipher(&session_id).unwrap(),
        );
        registry.register(client(), connection).unwrap();

        Fixture {
            handler: DatagramHandler::new(Arc::clone(&registry), Arc::new(sink), Arc::clone(&stats)),
            registry,
            stats,
            rx,
            client_cipher: crypto.session_cipher(&session_id).unwrap(),
            crypto,
            _pool: pool,
        }
    }

    #[tokio::test]
    async fn test_delivers_decrypted_payload() {
        let mut fx = fixture();
        let blob = fx.client_cipher.encrypt(b"ip packet").unwrap();

        assert_eq!(
            fx.handler.handle_inbound(client(), &blob),
            DatagramDisposition::Delivered { len: 9 }
        );

        let (from, payload) = tokio::time::timeout(Duration::from_secs(1), fx.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, client());
        assert_eq!(&payload[..], b"ip packet");
        assert_eq!(fx.registry.lookup(&client()).unwrap().bytes_received(), 9);
        assert_eq!(fx.stats.snapshot().datagrams_received, 1);
    }

    #[tokio::test]
    async fn test_unknown_sender_dropped() {
        let mut fx = fixture();
        let blob = fx.client_cipher.encrypt(b"ip packet").unwrap();
        let stranger: SocketAddr = "127.0.0.1:41001".parse().unwrap();

        assert_eq!(
            fx.handler.handle_inbound(stranger, &blob),
            DatagramDisposition::UnknownSender
        );
        assert_eq!(fx.stats.snapshot().datagrams_unknown_sender, 1);
        assert_eq!(fx.registry.lookup(&client()).unwrap().bytes_received(), 0);
        assert!(fx.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wrong_session_key_rejected() {
        let mut fx = fixture();
        // Same master key, different session: must not decrypt.
        let other = fx.crypto.session_cipher(&SessionId::generate()).unwrap();
        let blob = other.encrypt(b"spoofed").unwrap();

        assert_eq!(
            fx.handler.handle_inbound(client(), &blob),
            DatagramDisposition::DecryptFailed
        );
        assert_eq!(
            fx.handler.handle_inbound(client(), b"short"),
            DatagramDisposition::DecryptFailed
        );

        let connection = fx.registry.lookup(&client()).unwrap();
        assert_eq!(connection.bytes_received(), 0);
        assert_eq!(fx.stats.snapshot().decrypt_failures, 2);
        assert!(fx.rx.try_recv().is_err());
    }

    #[test]
    fn test_seal_outbound() {
        let fx = fixture();
        let blob = fx.handler.seal_outbound(&client(), b"reply").unwrap();

        assert_eq!(fx.client_cipher.decrypt(&blob).unwrap(), b"reply");
        assert_eq!(fx.registry.lookup(&client()).unwrap().bytes_sent(), 5);
        assert_eq!(fx.stats.snapshot().datagrams_sent, 1);

        let stranger: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert!(matches!(
            fx.handler.seal_outbound(&stranger, b"x"),
            Err(ServerError::ConnectionNotFound(_))
        ));
    }
}
