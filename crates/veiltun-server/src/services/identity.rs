// ============================================
// File: crates/veiltun-server/src/services/identity.rs
// ============================================
//! # Identity Resolution
//!
//! ## Creation Reason
//! The handshake needs to turn a presented credential into a user id. The
//! entitlement service behind that decision lives outside this crate, so
//! the seam is a trait.
//!
//! ## Main Functionality
//! - `IdentityResolver`: credential → `UserId` or rejection
//! - `StaticIdentityResolver`: token table from `[identity.tokens]`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Rejection reasons are logged server-side only; the peer always sees
//!   "authentication rejected"
//! - Never log the credential itself
//!
//! ## Last Modified
//! v0.1.0 - Initial identity resolver

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use veiltun_common::UserId;

use crate::config::IdentityConfig;
use crate::error::HandshakeError;

/// Maps a credential to the user it belongs to.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolves `credential`.
    ///
    /// # Errors
    /// `AuthenticationRejected` if the credential is unknown or refused.
    async fn resolve_credential(&self, credential: &str) -> Result<UserId, HandshakeError>;
}

/// Fixed token table.
pub struct StaticIdentityResolver {
    tokens: HashMap<String, UserId>,
}

impl StaticIdentityResolver {
    /// Creates a resolver from `(credential, user id)` pairs. Pairs with a
    /// blank user id are skipped.
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let tokens = entries
            .into_iter()
            .filter_map(|(token, user)| Some((token.into(), UserId::new(user).ok()?)))
            .collect();
        Self { tokens }
    }

    /// Creates a resolver from the `[identity]` configuration section.
    #[must_use]
    pub fn from_config(config: &IdentityConfig) -> Self {
        Self::new(config.tokens.iter().map(|(k, v)| (k.clone(), v.clone())))
    }

    /// Number of known credentials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if no credential can succeed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve_credential(&self, credential: &str) -> Result<UserId, HandshakeError> {
        if credential.trim().is_empty() {
            return Err(HandshakeError::rejected("blank credential"));
        }

        match self.tokens.get(credential) {
            Some(user) => {
                debug!(user_id = %user, "Credential resolved");
                Ok(user.clone())
            }
            None => Err(HandshakeError::rejected("unknown credential")),
        }
    }
}

impl std::fmt::Debug for StaticIdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticIdentityResolver")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}
