// ============================================
// File: crates/veiltun-core/src/crypto/kdf.rs
// ============================================
//! # Key Derivation Functions
//!
//! ## Main Functionality
//! - `derive_key`: Expands the master key into a labelled sub-key
//! - `derive_session_key`: Per-session tunnel key bound to a `SessionId`
//!
//! Both use HKDF-SHA256 with a fixed salt; the info label is the only
//! thing that separates one key from another.
//!
//! ## Last Modified
//! v0.1.0 - Initial key derivation

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use veiltun_common::types::SessionId;

use super::keys::{MasterKey, SymmetricKey};
use super::{HKDF_SALT, KEY_SIZE, SESSION_KEY_INFO};
use crate::error::{CoreError, Result};

/// Derives a 256-bit sub-key from the master key.
///
/// # Errors
/// Returns `KeyDerivation` if HKDF expansion fails.
pub fn derive_key(master: &MasterKey, info: &[u8]) -> Result<SymmetricKey> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), master.as_bytes());

    let mut key_bytes = [0u8; KEY_SIZE];
    hk.expand(info, &mut key_bytes)
        .map_err(|_| CoreError::key_derivation("HKDF expansion failed"))?;

    Ok(SymmetricKey::from_bytes(key_bytes))
}

/// Derives the tunnel key for one session.
///
/// info = `"veiltun-session"` ‖ session id bytes
///
/// # Errors
/// Returns `KeyDerivation` if HKDF expansion fails.
pub fn derive_session_key(master: &MasterKey, session_id: &SessionId) -> Result<SymmetricKey> {
    let mut info = Vec::with_capacity(SESSION_KEY_INFO.len() + session_id.as_bytes().len());
    info.extend_from_slice(SESSION_KEY_INFO);
    info.extend_from_slice(session_id.as_bytes());

    let key = derive_key(master, &info);
    info.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{DATA_KEY_INFO, MAC_KEY_INFO};

    fn master() -> MasterKey {
        MasterKey::from_bytes(&[0x11; 32]).unwrap()
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_key(&master(), MAC_KEY_INFO).unwrap();
        let b = derive_key(&master(), MAC_KEY_INFO).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_labels_separate_keys() {
        let mac = derive_key(&master(), MAC_KEY_INFO).unwrap();
        let data = derive_key(&master(), DATA_KEY_INFO).unwrap();
        assert_ne!(mac, data);
        assert_ne!(mac.as_bytes(), master().as_bytes());
    }

    #[test]
    fn test_session_keys_differ_per_session() {
        let s1 = SessionId::from_bytes(&[1u8; 16]).unwrap();
        let s2 = SessionId::from_bytes(&[2u8; 16]).unwrap();

        let k1 = derive_session_key(&master(), &s1).unwrap();
        let k1_again = derive_session_key(&master(), &s1).unwrap();
        let k2 = derive_session_key(&master(), &s2).unwrap();

        assert_eq!(k1, k1_again);
        assert_ne!(k1, k2);
    }
}
