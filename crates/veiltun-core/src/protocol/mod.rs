// ============================================
// File: crates/veiltun-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Defines the control-channel wire format and the handshake payloads.
//!
//! ## Main Functionality
//! - [`packet`]: `PacketType`, `PacketHeader`, `Packet`
//! - [`codec`]: `PacketCodec` (sign on encode, verify on decode)
//! - [`payload`]: JSON handshake bodies
//! - [`version`]: protocol version byte
//!
//! ## Handshake Flow
//! ```text
//! Client                                   Server
//!   │  AUTH_REQUEST {credential}  ─────────►  │
//!   │  ◄───────  AUTH_RESPONSE {user, session}│
//!   │  TUNNEL_DATA (ack)          ─────────►  │
//!   │  ◄───────────  TUNNEL_DATA {TunnelConfig}│
//!   │                                         │
//!   │  ═══ encrypted datagrams (UDP) ═══      │
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol

pub mod codec;
pub mod packet;
pub mod payload;
pub mod version;

pub use codec::PacketCodec;
pub use packet::{Packet, PacketHeader, PacketType, HEADER_SIZE, MAX_PACKET_SIZE, MAX_PAYLOAD};
pub use payload::{AuthRequest, AuthResponse, ErrorBody, HandshakePayload, TunnelConfig};
pub use version::{ProtocolVersion, PROTOCOL_VERSION};
