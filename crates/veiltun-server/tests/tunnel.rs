// ============================================
// File: crates/veiltun-server/tests/tunnel.rs
// ============================================
//! End-to-end tests: a real `TunnelServer` on loopback, driven by a
//! minimal client over TCP and UDP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc};

use veiltun_core::protocol::{
    AuthRequest, AuthResponse, PacketHeader, TunnelConfig, HEADER_SIZE,
};
use veiltun_core::{CryptoEngine, HandshakePayload, Packet, PacketCodec, PacketType, TunnelCipher};
use veiltun_server::{
    ChannelSink, ConnectionEvent, ServerConfig, StaticIdentityResolver, TunnelServer,
};

const WAIT: Duration = Duration::from_secs(5);

// ============================================
// Helpers
// ============================================

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.network.stream_addr = "127.0.0.1:0".parse().unwrap();
    config.network.datagram_addr = "127.0.0.1:0".parse().unwrap();
    config
        .identity
        .tokens
        .insert("alice-token".to_string(), "alice".to_string());
    config
}

struct Fixture {
    server: TunnelServer,
    crypto: Arc<CryptoEngine>,
    payloads: mpsc::Receiver<(SocketAddr, bytes::Bytes)>,
    events: broadcast::Receiver<ConnectionEvent>,
    stream_addr: SocketAddr,
    datagram_addr: SocketAddr,
}

async fn start(config: ServerConfig) -> Fixture {
    let crypto = Arc::new(CryptoEngine::generate().unwrap());
    let identity = StaticIdentityResolver::from_config(&config.identity);
    let (sink, payloads) = ChannelSink::new(16);

    let server =
        TunnelServer::new(config, Arc::clone(&crypto), Arc::new(identity), Arc::new(sink)).unwrap();
    let events = server.subscribe();
    let handle = server.start().await.unwrap();

    Fixture {
        server,
        crypto,
        payloads,
        events,
        stream_addr: handle.stream_addr,
        datagram_addr: handle.datagram_addr,
    }
}

async fn next_event(events: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .unwrap()
}

/// Polls `check` until it holds or the wait expires.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

struct TestClient {
    stream: TcpStream,
    codec: PacketCodec,
}

impl TestClient {
    async fn connect(addr: SocketAddr, crypto: &Arc<CryptoEngine>) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            codec: PacketCodec::new(Arc::clone(crypto)),
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.stream.local_addr().unwrap()
    }

    async fn send(&mut self, packet_type: PacketType, payload: &[u8]) {
        let frame = self.codec.encode(packet_type, payload).unwrap();
        self.stream.write_all(&frame).await.unwrap();
    }

    async fn recv(&mut self) -> Packet {
        let mut header = [0u8; HEADER_SIZE];
        tokio::time::timeout(WAIT, self.stream.read_exact(&mut header))
            .await
            .expect("timed out waiting for packet")
            .unwrap();
        let mut body = vec![0u8; PacketHeader::parse(&header).body_len().unwrap()];
        self.stream.read_exact(&mut body).await.unwrap();
        self.codec.decode(&header, &body).unwrap()
    }

    /// Reads until the server closes the stream.
    async fn expect_closed(&mut self) {
        let mut buf = [0u8; 256];
        loop {
            match tokio::time::timeout(WAIT, self.stream.read(&mut buf))
                .await
                .expect("stream not closed")
            {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    }

    async fn handshake(&mut self, credential: &str) -> (AuthResponse, TunnelConfig) {
        let body = serde_json::to_vec(&AuthRequest {
            credential: credential.to_string(),
        })
        .unwrap();
        self.send(PacketType::AuthRequest, &body).await;

        let packet = self.recv().await;
        let HandshakePayload::AuthResponse(response) =
            HandshakePayload::decode_expected(&packet, PacketType::AuthResponse).unwrap()
        else {
            panic!("expected AUTH_RESPONSE");
        };

        self.send(PacketType::TunnelData, b"ack").await;

        let packet = self.recv().await;
        let HandshakePayload::TunnelConfig(config) =
            HandshakePayload::decode_expected(&packet, PacketType::TunnelData).unwrap()
        else {
            panic!("expected tunnel config");
        };

        (response, config)
    }
}

/// UDP socket sharing the TCP client's address, so datagrams match its
/// registry entry.
async fn datagram_socket(client: &TestClient) -> UdpSocket {
    UdpSocket::bind(client.local_addr()).await.unwrap()
}

// ============================================
// Tests
// ============================================

#[tokio::test]
async fn test_full_session_over_both_channels() {
    let mut fx = start(test_config()).await;
    let mut client = TestClient::connect(fx.stream_addr, &fx.crypto).await;
    let client_addr = client.local_addr();

    let (response, tunnel) = client.handshake("alice-token").await;
    assert_eq!(response.user_id.as_str(), "alice");

    match next_event(&mut fx.events).await {
        ConnectionEvent::Connected { client_id, user_id } => {
            assert_eq!(client_id, client_addr);
            assert_eq!(user_id.as_str(), "alice");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let active = fx.server.active_connections();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].assigned_ip, tunnel.client_address);

    // Client → server datagram.
    let cipher: TunnelCipher = fx.crypto.session_cipher(&response.session_id).unwrap();
    let udp = datagram_socket(&client).await;
    let blob = cipher.encrypt(b"inbound packet").unwrap();
    udp.send_to(&blob, fx.datagram_addr).await.unwrap();

    let (from, payload) = tokio::time::timeout(WAIT, fx.payloads.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, client_addr);
    assert_eq!(&payload[..], b"inbound packet");

    // Server → client datagram.
    fx.server.send_datagram(client_addr, b"outbound").await.unwrap();
    let mut buf = [0u8; 2048];
    let (len, from) = tokio::time::timeout(WAIT, udp.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, fx.datagram_addr);
    assert_eq!(cipher.decrypt(&buf[..len]).unwrap(), b"outbound");

    // Keep-alive is echoed.
    client.send(PacketType::KeepAlive, &[]).await;
    assert_eq!(client.recv().await.packet_type, PacketType::KeepAlive);

    client.send(PacketType::Disconnect, &[]).await;
    match next_event(&mut fx.events).await {
        ConnectionEvent::Disconnected { client_id, reason, .. } => {
            assert_eq!(client_id, client_addr);
            assert_eq!(reason, "client disconnect");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    client.expect_closed().await;

    let stats = fx.server.stats();
    assert_eq!(stats.handshakes_completed, 1);
    assert_eq!(stats.datagrams_received, 1);
    assert_eq!(stats.datagrams_sent, 1);
    assert!(fx.server.active_connections().is_empty());

    fx.server.stop().await;
}

#[tokio::test]
async fn test_rejected_credential_gets_error_packet() {
    let fx = start(test_config()).await;
    let mut client = TestClient::connect(fx.stream_addr, &fx.crypto).await;

    let body = serde_json::to_vec(&AuthRequest {
        credential: "wrong".to_string(),
    })
    .unwrap();
    client.send(PacketType::AuthRequest, &body).await;

    let packet = client.recv().await;
    let HandshakePayload::Error(error) =
        HandshakePayload::decode_expected(&packet, PacketType::Error).unwrap()
    else {
        panic!("expected ERROR");
    };
    assert_eq!(error.message, "authentication rejected");
    client.expect_closed().await;

    let server = &fx.server;
    assert!(eventually(|| server.stats().handshakes_failed == 1).await);
    assert!(server.active_connections().is_empty());
    fx.server.stop().await;
}

#[tokio::test]
async fn test_capacity_rejects_before_any_bytes() {
    let mut config = test_config();
    config.limits.max_connections = 1;
    let mut fx = start(config).await;

    let mut first = TestClient::connect(fx.stream_addr, &fx.crypto).await;
    first.handshake("alice-token").await;
    assert!(matches!(next_event(&mut fx.events).await, ConnectionEvent::Connected { .. }));

    let mut second = TcpStream::connect(fx.stream_addr).await.unwrap();
    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(WAIT, second.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)), "no bytes expected, got {read:?}");

    let server = &fx.server;
    assert!(eventually(|| server.stats().connections_rejected == 1).await);
    assert_eq!(server.active_connections().len(), 1);
    fx.server.stop().await;
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let mut config = test_config();
    config.limits.handshake_timeout_secs = 1;
    let fx = start(config).await;

    let mut client = TestClient::connect(fx.stream_addr, &fx.crypto).await;

    let packet = client.recv().await;
    let HandshakePayload::Error(error) =
        HandshakePayload::decode_expected(&packet, PacketType::Error).unwrap()
    else {
        panic!("expected ERROR");
    };
    assert_eq!(error.message, "handshake timeout");
    client.expect_closed().await;

    let server = &fx.server;
    assert!(eventually(|| server.stats().handshakes_failed == 1).await);
    fx.server.stop().await;
}

#[tokio::test]
async fn test_unknown_datagram_sender_dropped() {
    let mut fx = start(test_config()).await;

    let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let blob = fx.crypto.encrypt(b"not registered").unwrap();
    stranger.send_to(&blob, fx.datagram_addr).await.unwrap();

    let server = &fx.server;
    assert!(eventually(|| server.stats().datagrams_unknown_sender == 1).await);
    assert!(fx.payloads.try_recv().is_err());
    fx.server.stop().await;
}

#[tokio::test]
async fn test_spoofed_datagram_from_registered_address_rejected() {
    let mut fx = start(test_config()).await;
    let mut client = TestClient::connect(fx.stream_addr, &fx.crypto).await;
    client.handshake("alice-token").await;
    next_event(&mut fx.events).await;

    // Right address, master key instead of the session key.
    let udp = datagram_socket(&client).await;
    let blob = fx.crypto.encrypt(b"spoofed").unwrap();
    udp.send_to(&blob, fx.datagram_addr).await.unwrap();

    let server = &fx.server;
    assert!(eventually(|| server.stats().decrypt_failures == 1).await);
    assert!(fx.payloads.try_recv().is_err());
    assert_eq!(server.active_connections()[0].bytes_received, 0);
    fx.server.stop().await;
}

#[tokio::test]
async fn test_stop_cancels_pending_handshake() {
    let fx = start(test_config()).await;
    let mut client = TestClient::connect(fx.stream_addr, &fx.crypto).await;

    // Let the accept task hand the stream to a handshake.
    let server = &fx.server;
    assert!(eventually(|| server.stats().connections_accepted == 1).await);

    // Handshake timeout is 30 s; stop must not wait for it.
    tokio::time::timeout(Duration::from_secs(3), fx.server.stop())
        .await
        .expect("stop() blocked on a pending handshake");

    client.expect_closed().await;
    assert!(!fx.server.is_running());
    assert!(TcpStream::connect(fx.stream_addr).await.is_err());
}

#[tokio::test]
async fn test_stop_removes_established_connections() {
    let mut fx = start(test_config()).await;
    let mut client = TestClient::connect(fx.stream_addr, &fx.crypto).await;
    client.handshake("alice-token").await;
    next_event(&mut fx.events).await;

    fx.server.stop().await;

    match next_event(&mut fx.events).await {
        ConnectionEvent::Disconnected { reason, .. } => assert_eq!(reason, "shutdown"),
        other => panic!("unexpected event: {other:?}"),
    }
    client.expect_closed().await;
    assert!(fx.server.active_connections().is_empty());
}

#[tokio::test]
async fn test_idle_connection_expires() {
    let mut config = test_config();
    config.limits.idle_timeout_secs = 1;
    config.limits.cleanup_interval_secs = 1;
    let mut fx = start(config).await;

    let mut client = TestClient::connect(fx.stream_addr, &fx.crypto).await;
    let client_addr = client.local_addr();
    client.handshake("alice-token").await;
    next_event(&mut fx.events).await;

    match next_event(&mut fx.events).await {
        ConnectionEvent::Disconnected { client_id, reason, .. } => {
            assert_eq!(client_id, client_addr);
            assert_eq!(reason, "idle timeout");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    client.expect_closed().await;
    fx.server.stop().await;
}
