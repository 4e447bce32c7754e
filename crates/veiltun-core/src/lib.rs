// ============================================
// File: crates/veiltun-core/src/lib.rs
// ============================================
//! # VeilTun Core - Protocol and Cryptography
//!
//! ## Creation Reason
//! Holds everything about the tunnel protocol that does not touch a socket:
//! the signed packet format, the handshake payloads and the crypto engine.
//!
//! ## Main Functionality
//! - [`crypto`]: `CryptoEngine` (HMAC signatures, ChaCha20-Poly1305 blobs, HKDF)
//! - [`protocol`]: `PacketCodec`, packet types, JSON handshake payloads
//! - [`error`]: `CoreError`
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              veiltun-server                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   veiltun-core  ◄──     veiltun-transport           │
//! │   You are here              │                       │
//! │         │                   │                       │
//! │         └──────────┬────────┘                       │
//! │                    ▼                                │
//! │             veiltun-common                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Guarantees
//! - **Integrity**: every control packet is HMAC-SHA256 signed
//! - **Confidentiality**: tunnel payload is ChaCha20-Poly1305 encrypted
//! - **Isolation**: each session has its own derived datagram key
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL cryptographic code uses audited RustCrypto implementations
//! - ALL keys MUST implement Zeroize for secure cleanup
//! - Wire format changes need a protocol version bump
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod crypto;
pub mod error;
pub mod protocol;

pub use crypto::{CryptoEngine, MasterKey, TunnelCipher};
pub use error::{CoreError, Result};
pub use protocol::{
    HandshakePayload, Packet, PacketCodec, PacketType, ProtocolVersion, PROTOCOL_VERSION,
};
