// ============================================
// File: crates/veiltun-server/src/handlers/control.rs
// ============================================
//! # Control Channel Handler
//!
//! ## Creation Reason
//! After the handshake the stream stays open as the control channel.
//! This loop answers keep-alives and turns every way the stream can end
//! into a registry removal with a reason.
//!
//! ## Main Functionality
//! - KEEP_ALIVE → touch activity, echo KEEP_ALIVE
//! - DISCONNECT → remove, `"client disconnect"`
//! - EOF / I/O failure → remove, `"connection closed"`
//! - Bad packet → remove, `"protocol error: ..."`
//! - Removed elsewhere (idle timeout) → stop reading, stream closes
//! - Server shutdown → return; `stop()` removes everything itself
//!
//! ## ⚠️ Important Note for Next Developer
//! - There is no read deadline here; idleness is the cleanup task's job
//! - Packets are handled strictly in arrival order
//!
//! ## Last Modified
//! v0.1.0 - Initial control loop

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, trace};

use veiltun_common::ClientId;
use veiltun_core::protocol::{PacketCodec, PacketType};
use veiltun_transport::FrameReader;

use crate::error::HandshakeError;
use crate::events::ConnectionEvent;
use crate::services::handshake::{read_packet, write_frame};
use crate::services::registry::ConnectionRegistry;

/// Reason used when the peer sends DISCONNECT.
pub const REASON_CLIENT_DISCONNECT: &str = "client disconnect";

/// Reason used when the stream ends or fails.
pub const REASON_CONNECTION_CLOSED: &str = "connection closed";

/// How the control loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlExit {
    /// This loop removed the connection with the given reason.
    Removed(String),
    /// The connection was removed elsewhere.
    RemovedElsewhere,
    /// The server is shutting down.
    Shutdown,
}

/// Serves the control channel of an established connection until it ends.
pub async fn run_control_loop<R, W>(
    client_id: ClientId,
    reader: &mut FrameReader<R>,
    writer: &mut W,
    codec: &PacketCodec,
    registry: &ConnectionRegistry,
    shutdown: &mut broadcast::Receiver<()>,
) -> ControlExit
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut events = registry.subscribe();

    // The entry may already be gone if it expired between register and here.
    if registry.get(&client_id).is_none() {
        return ControlExit::RemovedElsewhere;
    }

    loop {
        let packet = tokio::select! {
            biased;
            _ = shutdown.recv() => return ControlExit::Shutdown,
            event = events.recv() => {
                if removed_elsewhere(event, client_id, registry) {
                    debug!(client = %client_id, "Connection removed, closing control stream");
                    return ControlExit::RemovedElsewhere;
                }
                continue;
            }
            packet = read_packet(reader, codec, None) => packet,
        };

        let reason = match packet {
            Ok(packet) => match packet.packet_type {
                PacketType::KeepAlive => {
                    let Some(connection) = registry.get(&client_id) else {
                        return ControlExit::RemovedElsewhere;
                    };
                    connection.touch();
                    trace!(client = %client_id, "Keep-alive");

                    match echo_keepalive(writer, codec).await {
                        Ok(()) => continue,
                        Err(e) => {
                            debug!(client = %client_id, error = %e, "Keep-alive echo failed");
                            REASON_CONNECTION_CLOSED.to_string()
                        }
                    }
                }
                PacketType::Disconnect => REASON_CLIENT_DISCONNECT.to_string(),
                other => format!("protocol error: unexpected {other} after handshake"),
            },
            Err(HandshakeError::Framing(e)) => format!("protocol error: {e}"),
            Err(e) => {
                debug!(client = %client_id, error = %e, "Control stream ended");
                REASON_CONNECTION_CLOSED.to_string()
            }
        };

        return match registry.remove(&client_id, &reason) {
            Some(_) => ControlExit::Removed(reason),
            None => ControlExit::RemovedElsewhere,
        };
    }
}

fn removed_elsewhere(
    event: Result<ConnectionEvent, RecvError>,
    client_id: ClientId,
    registry: &ConnectionRegistry,
) -> bool {
    match event {
        Ok(ConnectionEvent::Disconnected { client_id: id, .. }) => id == client_id,
        Ok(ConnectionEvent::Connected { .. }) => false,
        Err(RecvError::Lagged(_)) => registry.get(&client_id).is_none(),
        // The registry outlives every connection task.
        Err(RecvError::Closed) => true,
    }
}

async fn echo_keepalive<W: AsyncWrite + Unpin>(
    writer: &mut W,
    codec: &PacketCodec,
) -> Result<(), HandshakeError> {
    let frame = codec.encode(PacketType::KeepAlive, &[])?;
    write_frame(writer, &frame).await
}

// ============================================
// Tests
// ============================================
