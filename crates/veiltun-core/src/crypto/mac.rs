// ============================================
// File: crates/veiltun-core/src/crypto/mac.rs
// ============================================
//! # Packet Signatures
//!
//! ## Creation Reason
//! Every control packet carries an HMAC-SHA256 over its header and
//! payload. This module owns the keyed MAC state.
//!
//! ## Main Functionality
//! - `PacketSigner::sign`: 32-byte tag over arbitrary data
//! - `PacketSigner::verify`: constant-time tag comparison
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never compare tags with `==`; use `verify`
//!
//! ## Last Modified
//! v0.1.0 - Initial HMAC signer

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::keys::SymmetricKey;
use super::SIGNATURE_SIZE;
use crate::error::{CoreError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Keyed HMAC-SHA256 signer.
#[derive(Clone)]
pub struct PacketSigner {
    mac: HmacSha256,
}

impl PacketSigner {
    /// Creates a signer for the given MAC key.
    ///
    /// # Errors
    /// Returns `CryptoInit` if the key is rejected by the MAC.
    pub fn new(key: &SymmetricKey) -> Result<Self> {
        let mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
            .map_err(|_| CoreError::crypto_init("invalid HMAC key"))?;
        Ok(Self { mac })
    }

    /// Computes the signature over `data`.
    #[must_use]
    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let mut mac = self.mac.clone();
        mac.update(data);
        let mut out = [0u8; SIGNATURE_SIZE];
        out.copy_from_slice(&mac.finalize().into_bytes());
        out
    }

    /// Returns `true` if `tag` is the signature of `data`.
    ///
    /// Tags of the wrong length never verify.
    #[must_use]
    pub fn verify(&self, data: &[u8], tag: &[u8]) -> bool {
        if tag.len() != SIGNATURE_SIZE {
            return false;
        }
        let expected = self.sign(data);
        expected.ct_eq(tag).into()
    }
}

impl fmt::Debug for PacketSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketSigner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(byte: u8) -> PacketSigner {
        PacketSigner::new(&SymmetricKey::from_bytes([byte; 32])).unwrap()
    }

    #[test]
    fn test_sign_verify() {
        let s = signer(7);
        let tag = s.sign(b"header and payload");
        assert!(s.verify(b"header and payload", &tag));
        assert!(!s.verify(b"header and payloaD", &tag));
    }

    #[test]
    fn test_wrong_key_fails() {
        let tag = signer(7).sign(b"data");
        assert!(!signer(8).verify(b"data", &tag));
    }

    #[test]
    fn test_wrong_length_tag_fails() {
        let s = signer(7);
        let tag = s.sign(b"data");
        assert!(!s.verify(b"data", &tag[..31]));
        assert!(!s.verify(b"data", &[]));
    }
}
