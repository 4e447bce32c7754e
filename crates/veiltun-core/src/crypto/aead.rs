// ============================================
// File: crates/veiltun-core/src/crypto/aead.rs
// ============================================
//! # Blob Encryption
//!
//! ## Creation Reason
//! Provides authenticated encryption for tunnel payloads using the
//! ChaCha20-Poly1305 AEAD cipher.
//!
//! ## Main Functionality
//! - `TunnelCipher::encrypt`: plaintext → `nonce ‖ tag ‖ ciphertext`
//! - `TunnelCipher::decrypt`: blob → plaintext, or an error and nothing else
//!
//! ## Blob Format
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │ Nonce (12 bytes)      │ ← random per call          │
//! ├────────────────────────────────────────────────────┤
//! │ Poly1305 Tag (16)     │ ← detached tag             │
//! ├────────────────────────────────────────────────────┤
//! │ Ciphertext (n bytes)  │ ← same length as plaintext │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The random nonce IS the AEAD nonce; never derive it from anything else
//! - Decryption works in place on a private buffer that is dropped on failure
//! - No associated data is bound; the session key already binds the peer
//!
//! ## Last Modified
//! v0.1.0 - Initial blob cipher

use std::fmt;

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Nonce, Tag,
};
use rand::rngs::OsRng;
use rand::RngCore;

use super::keys::SymmetricKey;
use super::{BLOB_OVERHEAD, NONCE_SIZE, TAG_SIZE};
use crate::error::{CoreError, Result};

/// ChaCha20-Poly1305 cipher bound to a single key.
///
/// # Example
/// ```
/// use veiltun_core::crypto::{SymmetricKey, TunnelCipher};
///
/// let cipher = TunnelCipher::new(&SymmetricKey::from_bytes([9u8; 32])).unwrap();
/// let blob = cipher.encrypt(b"ip packet").unwrap();
/// assert_eq!(cipher.decrypt(&blob).unwrap(), b"ip packet");
/// ```
pub struct TunnelCipher {
    cipher: ChaCha20Poly1305,
}

impl TunnelCipher {
    /// Creates a cipher for the given key.
    ///
    /// # Errors
    /// Returns `CryptoInit` if the key is rejected.
    pub fn new(key: &SymmetricKey) -> Result<Self> {
        let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
            .map_err(|_| CoreError::crypto_init("invalid ChaCha20-Poly1305 key"))?;
        Ok(Self { cipher })
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    ///
    /// # Errors
    /// Returns `Encryption` if the RNG or the cipher fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|_| CoreError::Encryption {
                context: "nonce generation failed".into(),
            })?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut blob = Vec::with_capacity(BLOB_OVERHEAD + plaintext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&[0u8; TAG_SIZE]);
        blob.extend_from_slice(plaintext);

        let tag = self
            .cipher
            .encrypt_in_place_detached(nonce, b"", &mut blob[BLOB_OVERHEAD..])
            .map_err(|_| CoreError::Encryption {
                context: "ChaCha20-Poly1305 encryption failed".into(),
            })?;
        blob[NONCE_SIZE..BLOB_OVERHEAD].copy_from_slice(&tag);

        Ok(blob)
    }

    /// Decrypts a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    /// - `MalformedInput` if the blob is shorter than nonce plus tag
    /// - `AuthenticationFailure` if the tag does not verify
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < BLOB_OVERHEAD {
            return Err(CoreError::MalformedInput {
                min: BLOB_OVERHEAD,
                actual: blob.len(),
            });
        }

        let nonce = Nonce::from_slice(&blob[..NONCE_SIZE]);
        let tag = Tag::from_slice(&blob[NONCE_SIZE..BLOB_OVERHEAD]);
        let mut buffer = blob[BLOB_OVERHEAD..].to_vec();

        self.cipher
            .decrypt_in_place_detached(nonce, b"", &mut buffer, tag)
            .map_err(|_| CoreError::AuthenticationFailure)?;

        Ok(buffer)
    }
}

impl fmt::Debug for TunnelCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TunnelCipher([REDACTED])")
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(byte: u8) -> TunnelCipher {
        TunnelCipher::new(&SymmetricKey::from_bytes([byte; 32])).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let c = cipher(1);
        for size in [0usize, 1, 64, 1500, 65_536] {
            let plaintext: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let blob = c.encrypt(&plaintext).unwrap();
            assert_eq!(blob.len(), plaintext.len() + BLOB_OVERHEAD);
            assert_eq!(c.decrypt(&blob).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_encryption_is_not_deterministic() {
        let c = cipher(1);
        let a = c.encrypt(b"same input").unwrap();
        let b = c.encrypt(b"same input").unwrap();
        assert_ne!(a, b);
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
    }

    #[test]
    fn test_tamper_detected_anywhere() {
        let c = cipher(1);
        let blob = c.encrypt(b"tunnel payload").unwrap();

        for i in 0..blob.len() {
            let mut tampered = blob.clone();
            tampered[i] ^= 0x01;
            assert!(
                matches!(c.decrypt(&tampered), Err(CoreError::AuthenticationFailure)),
                "flip at byte {i} was not detected"
            );
        }
    }

    #[test]
    fn test_short_blob_is_malformed() {
        let c = cipher(1);
        assert!(matches!(
            c.decrypt(&[0u8; 27]),
            Err(CoreError::MalformedInput { min: 28, actual: 27 })
        ));
        // 28 bytes is well-formed but the zero tag cannot verify
        assert!(matches!(
            c.decrypt(&[0u8; 28]),
            Err(CoreError::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = cipher(1).encrypt(b"secret").unwrap();
        assert!(matches!(
            cipher(2).decrypt(&blob),
            Err(CoreError::AuthenticationFailure)
        ));
    }
}
