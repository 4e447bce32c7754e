// ============================================
// File: crates/veiltun-core/src/protocol/payload.rs
// ============================================
//! # Handshake Payloads
//!
//! ## Creation Reason
//! Handshake packets carry JSON objects whose shape depends on the packet
//! type. This module gives each shape a type and ties it to the packet
//! type it travels in.
//!
//! ## Main Functionality
//! - `AuthRequest`, `AuthResponse`, `TunnelConfig`, `ErrorBody`
//! - `HandshakePayload`: the variant keyed by `PacketType`
//! - `HandshakePayload::decode_expected`: type check first, then parse
//!
//! ## ⚠️ Important Note for Next Developer
//! - Field names are part of the wire format
//! - A client acknowledgement is a TUNNEL_DATA packet whose body is not parsed
//!
//! ## Last Modified
//! v0.1.0 - Initial payload definitions

use std::net::{IpAddr, Ipv4Addr};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use veiltun_common::types::{SessionId, UserId};

use super::packet::{Packet, PacketType};
use crate::error::{CoreError, Result};

// ============================================
// Payload Bodies
// ============================================

/// Client credential, sent in AUTH_REQUEST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Opaque credential resolved by the identity service.
    pub credential: String,
}

/// Server answer to a successful AUTH_REQUEST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Always `"ok"` when sent by the server.
    pub status: String,
    /// The authenticated user.
    pub user_id: UserId,
    /// Fresh session identifier; seeds the datagram key.
    pub session_id: SessionId,
    /// Features enabled on this server.
    #[serde(default)]
    pub features: Vec<String>,
}

/// Tunnel parameters, sent by the server in TUNNEL_DATA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Address assigned to the client inside the tunnel.
    pub client_address: Ipv4Addr,
    /// Server side of the tunnel.
    pub server_address: Ipv4Addr,
    /// DNS resolvers the client should use.
    #[serde(default)]
    pub dns: Vec<IpAddr>,
    /// Tunnel MTU.
    pub mtu: u16,
    /// CIDR routes to send through the tunnel.
    #[serde(default)]
    pub routes: Vec<String>,
}

/// Failure reason, sent in ERROR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub message: String,
    /// Unix seconds at send time.
    pub timestamp: u64,
}

impl ErrorBody {
    /// Creates an error body stamped with the current time.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: veiltun_common::time::unix_timestamp(),
        }
    }
}

// ============================================
// HandshakePayload
// ============================================

/// A structured payload together with the packet type that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakePayload {
    /// AUTH_REQUEST body.
    AuthRequest(AuthRequest),
    /// AUTH_RESPONSE body.
    AuthResponse(AuthResponse),
    /// TUNNEL_DATA body sent by the server.
    TunnelConfig(TunnelConfig),
    /// ERROR body.
    Error(ErrorBody),
}

impl HandshakePayload {
    /// The packet type this payload travels in.
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        match self {
            Self::AuthRequest(_) => PacketType::AuthRequest,
            Self::AuthResponse(_) => PacketType::AuthResponse,
            Self::TunnelConfig(_) => PacketType::TunnelData,
            Self::Error(_) => PacketType::Error,
        }
    }

    /// Serializes the body to JSON.
    ///
    /// # Errors
    /// Returns `MalformedPayload` if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let encoded = match self {
            Self::AuthRequest(body) => serde_json::to_vec(body),
            Self::AuthResponse(body) => serde_json::to_vec(body),
            Self::TunnelConfig(body) => serde_json::to_vec(body),
            Self::Error(body) => serde_json::to_vec(body),
        };
        encoded.map_err(|e| CoreError::malformed(e.to_string()))
    }

    /// Decodes the payload of `packet`, which must have type `expected`.
    ///
    /// # Errors
    /// - `UnexpectedPacketType` if the packet has another type
    /// - `MalformedPayload` if the body is not the expected JSON object, or
    ///   `expected` carries no structured body
    pub fn decode_expected(packet: &Packet, expected: PacketType) -> Result<Self> {
        packet.expect_type(expected)?;

        match expected {
            PacketType::AuthRequest => parse(&packet.payload).map(Self::AuthRequest),
            PacketType::AuthResponse => parse(&packet.payload).map(Self::AuthResponse),
            PacketType::TunnelData => parse(&packet.payload).map(Self::TunnelConfig),
            PacketType::Error => parse(&packet.payload).map(Self::Error),
            PacketType::KeepAlive | PacketType::Disconnect => Err(CoreError::malformed(
                format!("{expected} carries no structured payload"),
            )),
        }
    }
}

fn parse<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| CoreError::malformed(e.to_string()))
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn packet(packet_type: PacketType, payload: &[u8]) -> Packet {
        Packet {
            version: 1,
            packet_type,
            timestamp: 0,
            payload: Bytes::copy_from_slice(payload),
            signature: [0u8; 32],
        }
    }

    #[test]
    fn test_auth_request_decodes() {
        let p = packet(PacketType::AuthRequest, br#"{"credential":"token-1"}"#);
        let decoded = HandshakePayload::decode_expected(&p, PacketType::AuthRequest).unwrap();
        assert_eq!(
            decoded,
            HandshakePayload::AuthRequest(AuthRequest {
                credential: "token-1".into()
            })
        );
    }

    #[test]
    fn test_type_mismatch_rejected_before_parse() {
        let p = packet(PacketType::KeepAlive, br#"{"credential":"token-1"}"#);
        assert!(matches!(
            HandshakePayload::decode_expected(&p, PacketType::AuthRequest),
            Err(CoreError::UnexpectedPacketType {
                expected: PacketType::AuthRequest,
                got: PacketType::KeepAlive
            })
        ));
    }

    #[test]
    fn test_malformed_json() {
        for body in [&b"not json"[..], b"{}", br#"{"credential": 5}"#, b""] {
            let p = packet(PacketType::AuthRequest, body);
            assert!(matches!(
                HandshakePayload::decode_expected(&p, PacketType::AuthRequest),
                Err(CoreError::MalformedPayload { .. })
            ));
        }
    }

    #[test]
    fn test_auth_response_wire_shape() {
        let response = HandshakePayload::AuthResponse(AuthResponse {
            status: "ok".into(),
            user_id: UserId::new("alice").unwrap(),
            session_id: SessionId::from_bytes(&[0u8; 16]).unwrap(),
            features: vec!["keepalive".into()],
        });
        assert_eq!(response.packet_type(), PacketType::AuthResponse);

        let json: serde_json::Value = serde_json::from_slice(&response.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["user_id"], "alice");
        assert_eq!(json["session_id"], "AAAAAAAAAAAAAAAAAAAAAA==");
        assert_eq!(json["features"][0], "keepalive");
    }

    #[test]
    fn test_tunnel_config_roundtrip() {
        let config = TunnelConfig {
            client_address: Ipv4Addr::new(10, 8, 0, 2),
            server_address: Ipv4Addr::new(10, 8, 0, 1),
            dns: vec!["1.1.1.1".parse().unwrap()],
            mtu: 1420,
            routes: vec!["0.0.0.0/0".into()],
        };
        let payload = HandshakePayload::TunnelConfig(config.clone());
        let p = packet(PacketType::TunnelData, &payload.to_json().unwrap());
        assert_eq!(
            HandshakePayload::decode_expected(&p, PacketType::TunnelData).unwrap(),
            HandshakePayload::TunnelConfig(config)
        );
    }

    #[test]
    fn test_keepalive_has_no_body() {
        let p = packet(PacketType::KeepAlive, b"");
        assert!(matches!(
            HandshakePayload::decode_expected(&p, PacketType::KeepAlive),
            Err(CoreError::MalformedPayload { .. })
        ));
    }
}
