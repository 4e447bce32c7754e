// ============================================
// File: crates/veiltun-core/src/protocol/codec.rs
// ============================================
//! # Packet Codec
//!
//! ## Creation Reason
//! Turns (type, payload) pairs into signed wire packets and back, using
//! the shared `CryptoEngine` for the signature.
//!
//! ## Main Functionality
//! - `PacketCodec::encode`: header ‖ payload ‖ HMAC
//! - `PacketCodec::decode`: validated, verified `Packet`
//! - `PacketCodec::decode_frame`: same, from one contiguous buffer
//!
//! ## Parsing Strategy
//! 1. Version byte
//! 2. Declared length against `MAX_PAYLOAD`
//! 3. Supplied length against the declared length
//! 4. Signature
//! 5. Type byte, only now that the bytes are authentic
//!
//! ## ⚠️ Important Note for Next Developer
//! - Keep the check order; tests depend on which error wins
//! - Never act on a header field (other than length) before step 4
//!
//! ## Last Modified
//! v0.1.0 - Initial codec implementation

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use veiltun_common::time::unix_timestamp_u32;

use super::packet::{Packet, PacketHeader, PacketType, HEADER_SIZE, MAX_PAYLOAD};
use super::version::PROTOCOL_VERSION;
use crate::crypto::{CryptoEngine, SIGNATURE_SIZE};
use crate::error::{CoreError, Result};

/// Encoder/decoder for signed control packets.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    crypto: Arc<CryptoEngine>,
}

impl PacketCodec {
    /// Creates a codec that signs and verifies with `crypto`.
    #[must_use]
    pub fn new(crypto: Arc<CryptoEngine>) -> Self {
        Self { crypto }
    }

    /// Encodes a packet stamped with the current time.
    ///
    /// # Errors
    /// Returns `PayloadTooLarge` if `payload` exceeds `MAX_PAYLOAD`.
    pub fn encode(&self, packet_type: PacketType, payload: &[u8]) -> Result<Bytes> {
        self.encode_at(packet_type, payload, unix_timestamp_u32())
    }

    /// Encodes a packet with an explicit timestamp.
    ///
    /// # Errors
    /// Returns `PayloadTooLarge` if `payload` exceeds `MAX_PAYLOAD`.
    pub fn encode_at(
        &self,
        packet_type: PacketType,
        payload: &[u8],
        timestamp: u32,
    ) -> Result<Bytes> {
        if payload.len() > MAX_PAYLOAD {
            return Err(CoreError::PayloadTooLarge {
                max: MAX_PAYLOAD,
                actual: payload.len(),
            });
        }

        let header = PacketHeader {
            version: PROTOCOL_VERSION,
            packet_type: packet_type.as_byte(),
            timestamp,
            // MAX_PAYLOAD fits in u32
            length: u32::try_from(payload.len()).unwrap_or(u32::MAX),
        };

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len() + SIGNATURE_SIZE);
        buf.put_slice(&header.to_bytes());
        buf.put_slice(payload);
        let signature = self.crypto.sign(&buf);
        buf.put_slice(&signature);

        Ok(buf.freeze())
    }

    /// Decodes a packet from its header and the bytes that follow it.
    ///
    /// # Errors
    /// In check order: `UnsupportedVersion`, `PayloadTooLarge`,
    /// `TruncatedPacket`, `InvalidSignature`, `UnknownPacketType`.
    pub fn decode(&self, header: &[u8; HEADER_SIZE], body_and_sig: &[u8]) -> Result<Packet> {
        let parsed = PacketHeader::parse(header);

        if parsed.version != PROTOCOL_VERSION {
            return Err(CoreError::UnsupportedVersion {
                got: parsed.version,
                expected: PROTOCOL_VERSION,
            });
        }

        let expected = parsed.body_len()?;
        if body_and_sig.len() != expected {
            return Err(CoreError::truncated(expected, body_and_sig.len()));
        }

        let (payload, signature) = body_and_sig.split_at(parsed.payload_len());

        let mut signed = Vec::with_capacity(HEADER_SIZE + payload.len());
        signed.extend_from_slice(header);
        signed.extend_from_slice(payload);
        if !self.crypto.verify_signature(&signed, signature) {
            return Err(CoreError::InvalidSignature);
        }

        let packet_type = PacketType::from_byte(parsed.packet_type)
            .ok_or(CoreError::UnknownPacketType(parsed.packet_type))?;

        let mut sig = [0u8; SIGNATURE_SIZE];
        sig.copy_from_slice(signature);

        Ok(Packet {
            version: parsed.version,
            packet_type,
            timestamp: parsed.timestamp,
            payload: Bytes::copy_from_slice(payload),
            signature: sig,
        })
    }

    /// Decodes one complete packet held in a single buffer.
    ///
    /// # Errors
    /// `TruncatedPacket` if the buffer is shorter than a header, otherwise as
    /// [`decode`](Self::decode).
    pub fn decode_frame(&self, frame: &[u8]) -> Result<Packet> {
        if frame.len() < HEADER_SIZE {
            return Err(CoreError::truncated(HEADER_SIZE, frame.len()));
        }
        let (header, rest) = frame.split_at(HEADER_SIZE);
        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes.copy_from_slice(header);
        self.decode(&header_bytes, rest)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> PacketCodec {
        PacketCodec::new(Arc::new(CryptoEngine::generate().unwrap()))
    }

    fn split(frame: &[u8]) -> ([u8; HEADER_SIZE], Vec<u8>) {
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&frame[..HEADER_SIZE]);
        (header, frame[HEADER_SIZE..].to_vec())
    }

    #[test]
    fn test_roundtrip_all_types_and_sizes() {
        let codec = codec();
        for t in PacketType::ALL {
            for size in [0usize, 17, MAX_PAYLOAD] {
                let payload = vec![0xA5u8; size];
                let frame = codec.encode_at(t, &payload, 1_700_000_000).unwrap();
                assert_eq!(frame.len(), HEADER_SIZE + size + SIGNATURE_SIZE);

                let packet = codec.decode_frame(&frame).unwrap();
                assert_eq!(packet.packet_type, t);
                assert_eq!(packet.version, PROTOCOL_VERSION);
                assert_eq!(packet.timestamp, 1_700_000_000);
                assert_eq!(&packet.payload[..], &payload[..]);
            }
        }
    }

    #[test]
    fn test_payload_size_bound() {
        let codec = codec();
        assert!(codec
            .encode(PacketType::TunnelData, &vec![0u8; MAX_PAYLOAD])
            .is_ok());
        assert!(matches!(
            codec.encode(PacketType::TunnelData, &vec![0u8; MAX_PAYLOAD + 1]),
            Err(CoreError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_declared_length_too_large() {
        let codec = codec();
        let frame = codec.encode(PacketType::KeepAlive, b"").unwrap();
        let (mut header, body) = split(&frame);
        header[8..12].copy_from_slice(&(65_537u32).to_be_bytes());
        assert!(matches!(
            codec.decode(&header, &body),
            Err(CoreError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_version_checked_before_signature() {
        let codec = codec();
        let frame = codec.encode(PacketType::AuthRequest, b"{}").unwrap();
        let (mut header, mut body) = split(&frame);
        header[0] = 0x02;
        // Also break the signature: the version error must still win.
        let last = body.len() - 1;
        body[last] ^= 0xFF;
        assert!(matches!(
            codec.decode(&header, &body),
            Err(CoreError::UnsupportedVersion { got: 2, expected: 1 })
        ));
    }

    #[test]
    fn test_truncated_and_overlong_bodies() {
        let codec = codec();
        let frame = codec.encode(PacketType::AuthRequest, b"hello").unwrap();
        let (header, body) = split(&frame);

        assert!(matches!(
            codec.decode(&header, &body[..body.len() - 1]),
            Err(CoreError::TruncatedPacket { .. })
        ));

        let mut longer = body.clone();
        longer.push(0);
        assert!(matches!(
            codec.decode(&header, &longer),
            Err(CoreError::TruncatedPacket { .. })
        ));

        assert!(matches!(
            codec.decode_frame(&frame[..10]),
            Err(CoreError::TruncatedPacket { expected: 16, actual: 10 })
        ));
    }

    #[test]
    fn test_any_signed_bit_flip_is_rejected() {
        let codec = codec();
        let frame = codec.encode(PacketType::TunnelData, b"payload bytes").unwrap();

        // Version (byte 0) and length (bytes 8..12) have their own checks.
        let skip = |i: usize| i == 0 || (8..12).contains(&i);

        for i in (0..frame.len()).filter(|&i| !skip(i)) {
            for bit in 0..8 {
                let mut tampered = frame.to_vec();
                tampered[i] ^= 1 << bit;
                assert!(
                    matches!(codec.decode_frame(&tampered), Err(CoreError::InvalidSignature)),
                    "flip of bit {bit} in byte {i} was accepted"
                );
            }
        }
    }

    #[test]
    fn test_unknown_type_only_after_verification() {
        let codec = codec();
        let crypto = Arc::clone(&codec.crypto);

        // Hand-build a correctly signed packet with type 0x7F.
        let header = PacketHeader {
            version: PROTOCOL_VERSION,
            packet_type: 0x7F,
            timestamp: 0,
            length: 0,
        }
        .to_bytes();
        let sig = crypto.sign(&header);
        assert!(matches!(
            codec.decode(&header, &sig),
            Err(CoreError::UnknownPacketType(0x7F))
        ));

        // Same header with a bad signature reports the signature instead.
        assert!(matches!(
            codec.decode(&header, &[0u8; SIGNATURE_SIZE]),
            Err(CoreError::InvalidSignature)
        ));
    }

    #[test]
    fn test_other_key_rejects() {
        let frame = codec().encode(PacketType::KeepAlive, b"").unwrap();
        assert!(matches!(
            codec().decode_frame(&frame),
            Err(CoreError::InvalidSignature)
        ));
    }
}
