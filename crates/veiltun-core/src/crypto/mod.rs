// ============================================
// File: crates/veiltun-core/src/crypto/mod.rs
// ============================================
//! # Cryptography Module
//!
//! ## Creation Reason
//! Centralizes all cryptographic operations of the tunnel endpoint,
//! using audited RustCrypto implementations.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`keys`]: Master key and derived symmetric keys
//! - [`kdf`]: HKDF-SHA256 sub-key derivation
//! - [`mac`]: HMAC-SHA256 packet signatures
//! - [`aead`]: ChaCha20-Poly1305 blob encryption
//! - [`engine`]: `CryptoEngine`, the facade the rest of the system uses
//!
//! ## Key Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  MasterKey (256-bit, process lifetime)                      │
//! │     │                                                       │
//! │     ├── HKDF("veiltun-mac")   ──► HMAC key (packet sigs)    │
//! │     ├── HKDF("veiltun-data")  ──► data key (engine blobs)   │
//! │     └── HKDF("veiltun-session" ‖ session_id)                │
//! │                                ──► per-session tunnel key   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Blob Format
//! ```text
//! ┌────────────┬────────────┬──────────────────────┐
//! │ nonce (12) │  tag (16)  │ ciphertext (n)       │
//! └────────────┴────────────┴──────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL implementations use RustCrypto (audited)
//! - Nonces are drawn from the OS RNG inside `encrypt`; never accept one from callers
//! - ALL key types implement Zeroize
//!
//! ## Last Modified
//! v0.1.0 - Initial crypto implementation

pub mod aead;
pub mod engine;
pub mod kdf;
pub mod keys;
pub mod mac;

pub use aead::TunnelCipher;
pub use engine::CryptoEngine;
pub use keys::{MasterKey, SymmetricKey};
pub use mac::PacketSigner;

// ============================================
// Constants
// ============================================

/// Size of every symmetric key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of ChaCha20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of Poly1305 authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Bytes an encrypted blob adds on top of the plaintext.
pub const BLOB_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Size of an HMAC-SHA256 signature in bytes.
pub const SIGNATURE_SIZE: usize = 32;

/// HKDF salt for every derived key.
pub const HKDF_SALT: &[u8] = b"veiltun-v1";

/// HKDF info label for the packet MAC key.
pub const MAC_KEY_INFO: &[u8] = b"veiltun-mac";

/// HKDF info label for the engine data key.
pub const DATA_KEY_INFO: &[u8] = b"veiltun-data";

/// HKDF info prefix for per-session tunnel keys.
pub const SESSION_KEY_INFO: &[u8] = b"veiltun-session";
