// ============================================
// File: crates/veiltun-core/src/crypto/engine.rs
// ============================================
//! # Crypto Engine
//!
//! ## Creation Reason
//! One object holds the master key and the keys derived from it, so the
//! codec, the handshake and the datagram path all share a single
//! immutable context through `Arc<CryptoEngine>`.
//!
//! ## Main Functionality
//! - Construction: `initialize`, `generate`, `from_key_bytes`
//! - `sign` / `verify_signature`: packet MAC
//! - `encrypt` / `decrypt`: blobs under the engine data key
//! - `session_cipher`: per-session tunnel cipher
//!
//! ## Main Logical Flow
//! 1. Server start: generate a master key or load it from the key file
//! 2. Derive the MAC key and the data key once
//! 3. After each handshake, derive a session cipher from the new `SessionId`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Everything here is read-only after construction; no locks needed
//! - The master key lives for the process lifetime and is never persisted here
//!
//! ## Last Modified
//! v0.1.0 - Initial engine

use veiltun_common::types::SessionId;

use super::aead::TunnelCipher;
use super::kdf::{derive_key, derive_session_key};
use super::keys::MasterKey;
use super::mac::PacketSigner;
use super::{DATA_KEY_INFO, MAC_KEY_INFO, SIGNATURE_SIZE};
use crate::error::Result;

// ============================================
// CryptoEngine
// ============================================

/// Shared cryptographic context of a running server.
///
/// # Example
/// ```
/// use veiltun_core::crypto::CryptoEngine;
///
/// let engine = CryptoEngine::generate().unwrap();
///
/// let tag = engine.sign(b"packet bytes");
/// assert!(engine.verify_signature(b"packet bytes", &tag));
///
/// let blob = engine.encrypt(b"payload").unwrap();
/// assert_eq!(engine.decrypt(&blob).unwrap(), b"payload");
/// ```
#[derive(Debug)]
pub struct CryptoEngine {
    master: MasterKey,
    signer: PacketSigner,
    data_cipher: TunnelCipher,
}

impl CryptoEngine {
    /// Creates an engine from supplied key material, or a fresh random key.
    ///
    /// # Errors
    /// Returns `CryptoInit` if the supplied key is not 32 bytes or the RNG fails.
    pub fn initialize(key_material: Option<&[u8]>) -> Result<Self> {
        let master = match key_material {
            Some(bytes) => MasterKey::from_bytes(bytes)?,
            None => MasterKey::generate()?,
        };
        Self::with_master_key(master)
    }

    /// Creates an engine with a freshly generated master key.
    ///
    /// # Errors
    /// Returns `CryptoInit` if the RNG fails.
    pub fn generate() -> Result<Self> {
        Self::initialize(None)
    }

    /// Creates an engine from raw master key bytes.
    ///
    /// # Errors
    /// Returns `CryptoInit` if `bytes` is not 32 bytes long.
    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self> {
        Self::initialize(Some(bytes))
    }

    /// Creates an engine around an existing master key.
    ///
    /// # Errors
    /// Returns `KeyDerivation` or `CryptoInit` if a sub-key cannot be set up.
    pub fn with_master_key(master: MasterKey) -> Result<Self> {
        let signer = PacketSigner::new(&derive_key(&master, MAC_KEY_INFO)?)?;
        let data_cipher = TunnelCipher::new(&derive_key(&master, DATA_KEY_INFO)?)?;

        tracing::debug!("Crypto engine initialised");

        Ok(Self {
            master,
            signer,
            data_cipher,
        })
    }

    // ========================================
    // Signatures
    // ========================================

    /// Computes the HMAC-SHA256 signature of `data`.
    #[must_use]
    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signer.sign(data)
    }

    /// Verifies a signature in constant time.
    #[must_use]
    pub fn verify_signature(&self, data: &[u8], tag: &[u8]) -> bool {
        self.signer.verify(data, tag)
    }

    // ========================================
    // Encryption
    // ========================================

    /// Encrypts under the engine data key.
    ///
    /// # Errors
    /// Returns `Encryption` on RNG or cipher failure.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.data_cipher.encrypt(plaintext)
    }

    /// Decrypts a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    /// `MalformedInput` for short blobs, `AuthenticationFailure` for bad tags.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        self.data_cipher.decrypt(blob)
    }

    /// Derives the tunnel cipher for one session.
    ///
    /// # Errors
    /// Returns `KeyDerivation` or `CryptoInit` if the key cannot be set up.
    pub fn session_cipher(&self, session_id: &SessionId) -> Result<TunnelCipher> {
        TunnelCipher::new(&derive_session_key(&self.master, session_id)?)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    #[test]
    fn test_initialize_with_and_without_key() {
        assert!(CryptoEngine::initialize(None).is_ok());
        assert!(CryptoEngine::initialize(Some(&[3u8; 32])).is_ok());

        let err = CryptoEngine::initialize(Some(&[3u8; 31])).unwrap_err();
        assert!(matches!(err, CoreError::CryptoInit { .. }));
    }

    #[test]
    fn test_same_key_same_signatures() {
        let a = CryptoEngine::from_key_bytes(&[5u8; 32]).unwrap();
        let b = CryptoEngine::from_key_bytes(&[5u8; 32]).unwrap();
        let tag = a.sign(b"data");
        assert!(b.verify_signature(b"data", &tag));

        let other = CryptoEngine::generate().unwrap();
        assert!(!other.verify_signature(b"data", &tag));
    }

    #[test]
    fn test_session_cipher_is_isolated() {
        let engine = CryptoEngine::generate().unwrap();
        let s1 = SessionId::generate();
        let s2 = SessionId::generate();

        let blob = engine.session_cipher(&s1).unwrap().encrypt(b"hi").unwrap();

        assert_eq!(engine.session_cipher(&s1).unwrap().decrypt(&blob).unwrap(), b"hi");
        assert!(engine.session_cipher(&s2).unwrap().decrypt(&blob).is_err());
        assert!(engine.decrypt(&blob).is_err());
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CryptoEngine>();
    }
}
