// ============================================
// File: crates/veiltun-core/src/crypto/keys.rs
// ============================================
//! # Cryptographic Key Types
//!
//! ## Creation Reason
//! Defines key types with proper security properties (zeroize on drop,
//! constant-time comparison, redacted debug output).
//!
//! ## Main Functionality
//! - `MasterKey`: The long-lived 256-bit server key
//! - `SymmetricKey`: A key derived from the master key
//!
//! ## ⚠️ Important Note for Next Developer
//! - Key bytes must NEVER be logged
//! - `MasterKey` is only exported through the key file writer
//!
//! ## Last Modified
//! v0.1.0 - Initial key type definitions

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::KEY_SIZE;
use crate::error::{CoreError, Result};

// ============================================
// MasterKey
// ============================================

/// 256-bit master key from which every working key is derived.
///
/// # Example
/// ```
/// use veiltun_core::crypto::MasterKey;
///
/// let key = MasterKey::generate().unwrap();
/// let copy = MasterKey::from_bytes(key.as_bytes()).unwrap();
/// assert_eq!(key, copy);
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_SIZE]);

impl MasterKey {
    /// Generates a new key from the OS random number generator.
    ///
    /// # Errors
    /// Returns `CryptoInit` if the RNG is unavailable.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CoreError::crypto_init(format!("OS RNG failure: {e}")))?;
        Ok(Self(bytes))
    }

    /// Loads a key from raw bytes.
    ///
    /// # Errors
    /// Returns `CryptoInit` unless `bytes` is exactly 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CoreError::crypto_init(format!(
                "invalid master key size: expected {KEY_SIZE}, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

impl PartialEq for MasterKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for MasterKey {}

// ============================================
// SymmetricKey
// ============================================

/// A working key derived from the master key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Wraps raw derived bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SymmetricKey {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_random() {
        let a = MasterKey::generate().unwrap();
        let b = MasterKey::generate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        assert!(MasterKey::from_bytes(&[1u8; 32]).is_ok());

        let err = MasterKey::from_bytes(&[1u8; 16]).unwrap_err();
        assert!(matches!(err, CoreError::CryptoInit { .. }));
        assert!(MasterKey::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let key = MasterKey::from_bytes(&[0x42; 32]).unwrap();
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("42"));

        let sym = SymmetricKey::from_bytes([0x42; 32]);
        assert!(format!("{sym:?}").contains("REDACTED"));
    }
}
