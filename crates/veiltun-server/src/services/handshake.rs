// ============================================
// File: crates/veiltun-server/src/services/handshake.rs
// ============================================
//! # Handshake Service
//!
//! ## Creation Reason
//! Runs the control-channel handshake for one accepted stream:
//! authenticate the peer, hand out a session id, wait for the client's
//! acknowledgement, then announce the tunnel parameters.
//!
//! ## Main Functionality
//! - `HandshakeService`: shared dependencies (codec, identity, IP pool,
//!   tunnel settings, timeout)
//! - `HandshakeSession`: the per-stream state machine with its history
//! - `HandshakeOutcome`: everything the server needs to register the peer
//! - `read_packet`: deadline-bounded packet read, shared with the
//!   post-handshake control loop
//!
//! ## Handshake Flow
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    HandshakeSession                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Init ──► AwaitAuthRequest                                   │
//! │              │  AUTH_REQUEST {credential}                    │
//! │              ▼                                               │
//! │          Authenticating  (IdentityResolver)                  │
//! │              │                                               │
//! │              ▼                                               │
//! │          AuthResponseSent  ◄── AUTH_RESPONSE {session_id}    │
//! │              │                                               │
//! │              ▼                                               │
//! │          AwaitClientAck                                      │
//! │              │  TUNNEL_DATA (body ignored)                   │
//! │              ▼                                               │
//! │          TunnelConfigSent  ◄── TUNNEL_DATA {client_address}  │
//! │              │                                               │
//! │              ▼                                               │
//! │          Established                                         │
//! │                                                              │
//! │  any state ──► Failed  (ERROR packet sent, best effort)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every receive gets its own deadline; a slow but steady client is fine
//! - The shutdown receiver is polled first, so `stop()` wins over a
//!   packet that arrives at the same moment
//! - The IP lease lives in the outcome; any failure after allocation
//!   drops it and the address goes back to the pool
//! - The ERROR packet text comes from `HandshakeError::peer_message`
//!
//! ## Last Modified
//! v0.1.0 - Initial handshake service

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use veiltun_common::{ClientId, SessionId, UserId};
use veiltun_core::protocol::{
    AuthResponse, ErrorBody, HandshakePayload, Packet, PacketCodec, PacketHeader, PacketType,
    ProtocolVersion, TunnelConfig, HEADER_SIZE, PROTOCOL_VERSION,
};
use veiltun_core::{CoreError, CryptoEngine, TunnelCipher};
use veiltun_transport::{FrameReader, TransportError};

use crate::config::TunnelSettings;
use crate::error::HandshakeError;
use crate::services::identity::IdentityResolver;
use crate::services::ip_pool::{IpLease, IpPoolService};
use crate::services::registry::Connection;

/// Bound on the best-effort ERROR write.
const ERROR_SEND_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================
// HandshakeState
// ============================================

/// Handshake state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Stream accepted, nothing read yet.
    Init,
    /// Waiting for AUTH_REQUEST.
    AwaitAuthRequest,
    /// Credential is being resolved.
    Authenticating,
    /// AUTH_RESPONSE written.
    AuthResponseSent,
    /// Waiting for the client's TUNNEL_DATA acknowledgement.
    AwaitClientAck,
    /// Tunnel configuration written.
    TunnelConfigSent,
    /// Handshake complete.
    Established,
    /// Handshake aborted. Terminal.
    Failed,
}

impl HandshakeState {
    /// Returns `true` for `Established` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Established | Self::Failed)
    }
}

impl std::fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

// ============================================
// HandshakeOutcome
// ============================================

/// Result of a successful handshake.
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// Authenticated user.
    pub user_id: UserId,
    /// Session id sent in AUTH_RESPONSE.
    pub session_id: SessionId,
    /// Leased tunnel address.
    pub lease: IpLease,
    /// Datagram cipher derived from `session_id`.
    pub cipher: TunnelCipher,
}

impl HandshakeOutcome {
    /// Tunnel address assigned to the client.
    #[must_use]
    pub const fn assigned_ip(&self) -> Ipv4Addr {
        self.lease.ip()
    }

    /// Builds the registry entry for this outcome.
    #[must_use]
    pub fn into_connection(self, client_id: ClientId) -> Connection {
        Connection::new(client_id, self.user_id, self.session_id, self.lease, self.cipher)
    }
}

// ============================================
// HandshakeService
// ============================================

/// Dependencies shared by every handshake.
pub struct HandshakeService {
    codec: PacketCodec,
    crypto: Arc<CryptoEngine>,
    identity: Arc<dyn IdentityResolver>,
    ip_pool: Arc<IpPoolService>,
    tunnel: TunnelSettings,
    timeout: Duration,
}

impl HandshakeService {
    /// Creates the service.
    ///
    /// # Arguments
    /// * `crypto` - Shared engine; signs packets and derives session keys
    /// * `identity` - Credential resolver
    /// * `ip_pool` - Client address pool
    /// * `tunnel` - DNS, MTU, routes and features to announce
    /// * `timeout` - Bound on each receive
    pub fn new(
        crypto: Arc<CryptoEngine>,
        identity: Arc<dyn IdentityResolver>,
        ip_pool: Arc<IpPoolService>,
        tunnel: TunnelSettings,
        timeout: Duration,
    ) -> Self {
        Self {
            codec: PacketCodec::new(Arc::clone(&crypto)),
            crypto,
            identity,
            ip_pool,
            tunnel,
            timeout,
        }
    }

    /// Starts a handshake for the stream from `client_id`.
    #[must_use]
    pub fn session(&self, client_id: ClientId) -> HandshakeSession<'_> {
        HandshakeSession::new(self, client_id)
    }

    /// Codec used for control packets.
    #[must_use]
    pub const fn codec(&self) -> &PacketCodec {
        &self.codec
    }

    /// Bound on each receive.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for HandshakeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeService")
            .field("ip_pool", &self.ip_pool)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

// ============================================
// HandshakeSession
// ============================================

/// One handshake in progress.
#[derive(Debug)]
pub struct HandshakeSession<'a> {
    service: &'a HandshakeService,
    client_id: ClientId,
    state: HandshakeState,
    transitions: Vec<HandshakeState>,
}

impl<'a> HandshakeSession<'a> {
    fn new(service: &'a HandshakeService, client_id: ClientId) -> Self {
        let mut session = Self {
            service,
            client_id,
            state: HandshakeState::Init,
            transitions: vec![HandshakeState::Init],
        };
        session.transition(HandshakeState::AwaitAuthRequest);
        session
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> HandshakeState {
        self.state
    }

    /// Every state entered so far, in order, starting with `Init`.
    #[must_use]
    pub fn transitions(&self) -> &[HandshakeState] {
        &self.transitions
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!(client = %self.client_id, from = %self.state, to = %next, "Handshake transition");
        self.state = next;
        self.transitions.push(next);
    }

    /// Drives the handshake to `Established` or `Failed`.
    ///
    /// On failure an ERROR packet is written (errors swallowed) before
    /// returning. The stream itself is left to the caller.
    ///
    /// # Errors
    /// The `HandshakeError` that moved the session to `Failed`.
    pub async fn run<R, W>(
        &mut self,
        reader: &mut FrameReader<R>,
        writer: &mut W,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<HandshakeOutcome, HandshakeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        match self.drive(reader, writer, shutdown).await {
            Ok(outcome) => {
                self.transition(HandshakeState::Established);
                info!(
                    client = %self.client_id,
                    user_id = %outcome.user_id,
                    session_id = %outcome.session_id,
                    assigned_ip = %outcome.assigned_ip(),
                    "Handshake established"
                );
                Ok(outcome)
            }
            Err(err) => {
                let failed_in = self.state;
                self.transition(HandshakeState::Failed);
                if err.is_client_fault() {
                    info!(client = %self.client_id, state = %failed_in, error = %err, "Handshake failed");
                } else {
                    warn!(client = %self.client_id, state = %failed_in, error = %err, "Handshake failed");
                }
                self.send_error(writer, &err).await;
                Err(err)
            }
        }
    }

    async fn drive<R, W>(
        &mut self,
        reader: &mut FrameReader<R>,
        writer: &mut W,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<HandshakeOutcome, HandshakeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let service = self.service;

        // AUTH_REQUEST
        let packet = self.receive(reader, shutdown).await?;
        let HandshakePayload::AuthRequest(request) =
            HandshakePayload::decode_expected(&packet, PacketType::AuthRequest)?
        else {
            return Err(HandshakeError::internal("auth request decoded to another payload"));
        };

        self.transition(HandshakeState::Authenticating);
        let user_id = tokio::select! {
            biased;
            _ = shutdown.recv() => return Err(HandshakeError::Cancelled),
            resolved = service.identity.resolve_credential(&request.credential) => resolved?,
        };

        // AUTH_RESPONSE
        let session_id = SessionId::generate();
        let cipher = service
            .crypto
            .session_cipher(&session_id)
            .map_err(|e| HandshakeError::internal(e.to_string()))?;

        let response = HandshakePayload::AuthResponse(AuthResponse {
            status: "ok".to_string(),
            user_id: user_id.clone(),
            session_id: session_id.clone(),
            features: service.tunnel.features.clone(),
        });
        self.send(writer, &response).await?;
        self.transition(HandshakeState::AuthResponseSent);

        // Client acknowledgement
        self.transition(HandshakeState::AwaitClientAck);
        let ack = self.receive(reader, shutdown).await?;
        ack.expect_type(PacketType::TunnelData)?;

        // Tunnel configuration
        let lease = service.ip_pool.lease().map_err(|e| {
            warn!(client = %self.client_id, error = %e, "No tunnel address available");
            HandshakeError::IpPoolExhausted
        })?;

        let config = HandshakePayload::TunnelConfig(TunnelConfig {
            client_address: lease.ip(),
            server_address: service.ip_pool.gateway(),
            dns: service.tunnel.dns.clone(),
            mtu: service.tunnel.mtu,
            routes: service.tunnel.routes.clone(),
        });
        self.send(writer, &config).await?;
        self.transition(HandshakeState::TunnelConfigSent);

        Ok(HandshakeOutcome {
            user_id,
            session_id,
            lease,
            cipher,
        })
    }

    async fn receive<R: AsyncRead + Unpin>(
        &self,
        reader: &mut FrameReader<R>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<Packet, HandshakeError> {
        let deadline = Instant::now() + self.service.timeout;

        tokio::select! {
            biased;
            _ = shutdown.recv() => Err(HandshakeError::Cancelled),
            packet = read_packet(reader, &self.service.codec, Some(deadline)) => packet,
        }
    }

    async fn send<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        payload: &HandshakePayload,
    ) -> Result<(), HandshakeError> {
        let frame = self
            .service
            .codec
            .encode(payload.packet_type(), &payload.to_json()?)?;
        write_frame(writer, &frame).await
    }

    async fn send_error<W: AsyncWrite + Unpin>(&self, writer: &mut W, err: &HandshakeError) {
        let body = HandshakePayload::Error(ErrorBody::new(err.peer_message()));
        match tokio::time::timeout(ERROR_SEND_TIMEOUT, self.send(writer, &body)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(client = %self.client_id, error = %e, "ERROR packet not delivered"),
            Err(_) => debug!(client = %self.client_id, "ERROR packet write timed out"),
        }
    }
}

// ============================================
// Stream helpers
// ============================================

/// Reads one control packet: header, then exactly the declared body.
///
/// The version byte is checked before the body is read, and the declared
/// length is bounded before any body bytes are buffered. Nothing is
/// consumed until the whole frame is buffered, so the future can be
/// dropped by `tokio::select!` without desynchronizing the stream.
///
/// # Errors
/// - `Framing` for version, size, truncation or signature failures
/// - `HandshakeTimeout` if `deadline` passes
/// - `ConnectionClosed` on EOF
pub(crate) async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
    codec: &PacketCodec,
    deadline: Option<Instant>,
) -> Result<Packet, HandshakeError> {
    reader.fill_by(HEADER_SIZE, deadline).await?;
    let header = <[u8; HEADER_SIZE]>::try_from(&reader.peek()[..HEADER_SIZE])
        .map_err(|_| HandshakeError::internal("short header read"))?;

    let parsed = PacketHeader::parse(&header);
    if !ProtocolVersion::new(parsed.version).is_supported() {
        return Err(HandshakeError::Framing(CoreError::UnsupportedVersion {
            got: parsed.version,
            expected: PROTOCOL_VERSION,
        }));
    }

    let frame_len = HEADER_SIZE + parsed.body_len()?;
    reader.fill_by(frame_len, deadline).await?;
    let frame = reader.read_exact_by(frame_len, None).await?;
    Ok(codec.decode_frame(&frame)?)
}

/// Writes and flushes one encoded frame.
///
/// # Errors
/// `ConnectionClosed` if the peer went away, `Transport` otherwise.
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &[u8],
) -> Result<(), HandshakeError> {
    writer
        .write_all(frame)
        .await
        .map_err(|e| TransportError::io("writing packet", e))?;
    writer
        .flush()
        .await
        .map_err(|e| TransportError::io("flushing packet", e))?;
    Ok(())
}

// ============================================
// Tests
// ============================================
