// ============================================
// File: crates/veiltun-core/src/protocol/packet.rs
// ============================================
//! # Packet Definitions
//!
//! ## Creation Reason
//! Defines the wire unit of the control channel: a fixed 16-byte header,
//! a variable payload and a trailing 32-byte signature.
//!
//! ## Wire Format (Big Endian)
//! ```text
//! ┌────────┬────────┬──────────┬───────────┬──────────┬──────────┐
//! │ ver(1) │ type(1)│ rsvd(2)  │ ts u32(4) │ len u32  │ rsvd(4)  │
//! ├────────┴────────┴──────────┴───────────┴──────────┴──────────┤
//! │ payload (len bytes, len ≤ 65536)                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ HMAC-SHA256 over header ‖ payload (32 bytes)                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Field offsets are fixed - DO NOT reorder without a version bump
//! - Reserved bytes are written as zero and covered by the signature
//! - Add new packet types at the end to keep existing values stable
//!
//! ## Last Modified
//! v0.1.0 - Initial packet definitions

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::crypto::SIGNATURE_SIZE;
use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Size of the fixed packet header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Maximum payload length in bytes.
pub const MAX_PAYLOAD: usize = 65_536;

/// Largest complete packet on the wire.
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD + SIGNATURE_SIZE;

// ============================================
// PacketType
// ============================================

/// Control packet type.
///
/// | Value | Type |
/// |-------|------|
/// | 0x01 | AUTH_REQUEST |
/// | 0x02 | AUTH_RESPONSE |
/// | 0x03 | TUNNEL_DATA |
/// | 0x04 | KEEP_ALIVE |
/// | 0x05 | DISCONNECT |
/// | 0x06 | ERROR |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    /// Client presents its credential.
    AuthRequest = 0x01,
    /// Server answers with user and session identifiers.
    AuthResponse = 0x02,
    /// Client acknowledgement, and the server's tunnel configuration.
    TunnelData = 0x03,
    /// Liveness probe, echoed by the server.
    KeepAlive = 0x04,
    /// Orderly teardown.
    Disconnect = 0x05,
    /// Human-readable failure reason.
    Error = 0x06,
}

impl PacketType {
    /// All packet types, in wire order.
    pub const ALL: [Self; 6] = [
        Self::AuthRequest,
        Self::AuthResponse,
        Self::TunnelData,
        Self::KeepAlive,
        Self::Disconnect,
        Self::Error,
    ];

    /// Converts a wire byte to a packet type.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::AuthRequest),
            0x02 => Some(Self::AuthResponse),
            0x03 => Some(Self::TunnelData),
            0x04 => Some(Self::KeepAlive),
            0x05 => Some(Self::Disconnect),
            0x06 => Some(Self::Error),
            _ => None,
        }
    }

    /// Returns the wire byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns the protocol name of this type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AuthRequest => "AUTH_REQUEST",
            Self::AuthResponse => "AUTH_RESPONSE",
            Self::TunnelData => "TUNNEL_DATA",
            Self::KeepAlive => "KEEP_ALIVE",
            Self::Disconnect => "DISCONNECT",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================
// PacketHeader
// ============================================

/// The raw 16-byte header, before any validation.
///
/// The type byte is kept raw: it is only interpreted once the signature
/// has verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Protocol version byte.
    pub version: u8,
    /// Raw packet type byte.
    pub packet_type: u8,
    /// Sender clock, unix seconds.
    pub timestamp: u32,
    /// Declared payload length.
    pub length: u32,
}

impl PacketHeader {
    /// Reads the header fields. Never fails; validation is the codec's job.
    #[must_use]
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            version: bytes[0],
            packet_type: bytes[1],
            timestamp: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            length: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }

    /// Serializes the header, reserved bytes zeroed.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.version;
        out[1] = self.packet_type;
        out[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..12].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    /// Declared payload length as `usize`.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        usize::try_from(self.length).unwrap_or(usize::MAX)
    }

    /// Number of bytes that follow the header: payload plus signature.
    ///
    /// # Errors
    /// Returns `PayloadTooLarge` if the declared length exceeds the maximum,
    /// so a reader never waits for (or buffers) an oversized body.
    pub fn body_len(&self) -> Result<usize> {
        let len = self.payload_len();
        if len > MAX_PAYLOAD {
            return Err(CoreError::PayloadTooLarge {
                max: MAX_PAYLOAD,
                actual: len,
            });
        }
        Ok(len + SIGNATURE_SIZE)
    }
}

// ============================================
// Packet
// ============================================

/// A decoded control packet whose signature has verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Protocol version byte.
    pub version: u8,
    /// Packet type.
    pub packet_type: PacketType,
    /// Sender clock, informational only.
    pub timestamp: u32,
    /// Opaque payload.
    pub payload: Bytes,
    /// The verified signature.
    pub signature: [u8; SIGNATURE_SIZE],
}

impl Packet {
    /// Fails with `UnexpectedPacketType` unless this packet has type `expected`.
    ///
    /// # Errors
    /// `UnexpectedPacketType` on mismatch.
    pub fn expect_type(&self, expected: PacketType) -> Result<()> {
        if self.packet_type == expected {
            Ok(())
        } else {
            Err(CoreError::UnexpectedPacketType {
                expected,
                got: self.packet_type,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_from_byte() {
        for t in PacketType::ALL {
            assert_eq!(PacketType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(PacketType::from_byte(0x00), None);
        assert_eq!(PacketType::from_byte(0x07), None);
    }

    #[test]
    fn test_header_layout() {
        let header = PacketHeader {
            version: 1,
            packet_type: 4,
            timestamp: 0x0102_0304,
            length: 0x0000_0010,
        };
        let bytes = header.to_bytes();
        assert_eq!(
            bytes,
            [1, 4, 0, 0, 1, 2, 3, 4, 0, 0, 0, 0x10, 0, 0, 0, 0]
        );
        assert_eq!(PacketHeader::parse(&bytes), header);
    }

    #[test]
    fn test_body_len_bounds() {
        let mut header = PacketHeader {
            version: 1,
            packet_type: 1,
            timestamp: 0,
            length: 0,
        };
        assert_eq!(header.body_len().unwrap(), 32);

        header.length = 65_536;
        assert_eq!(header.body_len().unwrap(), 65_536 + 32);

        header.length = 65_537;
        assert!(matches!(
            header.body_len(),
            Err(CoreError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_expect_type() {
        let packet = Packet {
            version: 1,
            packet_type: PacketType::KeepAlive,
            timestamp: 0,
            payload: Bytes::new(),
            signature: [0u8; 32],
        };
        assert!(packet.expect_type(PacketType::KeepAlive).is_ok());
        assert!(matches!(
            packet.expect_type(PacketType::AuthRequest),
            Err(CoreError::UnexpectedPacketType { .. })
        ));
    }
}
