// ============================================
// File: crates/veiltun-server/src/services/mod.rs
// ============================================
//! # Server Services
//!
//! ## Creation Reason
//! Business logic of the tunnel endpoint, separated from socket handling.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`handshake`]: Per-stream handshake state machine
//! - [`registry`]: Established connections by client address
//! - [`ip_pool`]: Tunnel address allocation
//! - [`identity`]: Credential → user resolution
//!
//! ## Service Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Service Layer                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌──────────────────┐   ┌─────────────────────────────────┐ │
//! │  │ HandshakeService │   │      ConnectionRegistry         │ │
//! │  │                  │──►│  - Register at ESTABLISHED      │ │
//! │  │  - Verify sigs   │   │  - Activity and idle expiry     │ │
//! │  │  - Resolve creds │   │  - Lifecycle events             │ │
//! │  │  - Session keys  │   └─────────────────────────────────┘ │
//! │  └───────┬──────────┘                                       │
//! │          │                                                  │
//! │  ┌───────▼──────────┐   ┌─────────────────────────────────┐ │
//! │  │  IpPoolService   │   │      IdentityResolver           │ │
//! │  │  - Leases        │   │  - Static token table           │ │
//! │  └──────────────────┘   └─────────────────────────────────┘ │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Addresses are returned by dropping the lease, never by hand
//! - All services are Send + Sync and shared through `Arc`
//!
//! ## Last Modified
//! v0.1.0 - Initial services structure

pub mod handshake;
pub mod identity;
pub mod ip_pool;
pub mod registry;

// Re-export primary types
pub use handshake::{HandshakeOutcome, HandshakeService, HandshakeSession, HandshakeState};
pub use identity::{IdentityResolver, StaticIdentityResolver};
pub use ip_pool::{AddressRange, IpLease, IpPoolService};
pub use registry::{Connection, ConnectionInfo, ConnectionRegistry, ConnectionStatus};
