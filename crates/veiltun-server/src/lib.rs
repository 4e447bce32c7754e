// ============================================
// File: crates/veiltun-server/src/lib.rs
// ============================================
//! # VeilTun Server Library
//!
//! ## Creation Reason
//! Provides the tunnel endpoint: it authenticates peers over a signed
//! control stream and then carries their encrypted tunnel payload over a
//! datagram socket.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: Server configuration management
//! - [`server`]: Main server orchestration
//! - [`services`]: Business logic services
//!   - [`services::handshake`]: Handshake state machine
//!   - [`services::registry`]: Established connections
//!   - [`services::ip_pool`]: Tunnel address allocation
//!   - [`services::identity`]: Credential resolution
//! - [`handlers`]: Control stream, datagram and payload handlers
//! - [`events`]: Connection lifecycle events
//! - [`stats`]: Server counters
//! - [`error`]: Server-specific error types
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        VeilTun Server                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐  │
//! │  │   Config    │────►│TunnelServer │────►│    Handlers     │  │
//! │  │             │     │             │     │ control/datagram│  │
//! │  └─────────────┘     └──────┬──────┘     └────────┬────────┘  │
//! │                             │                     │           │
//! │         ┌───────────────────┼───────────────────┬─┘           │
//! │         ▼                   ▼                   ▼             │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     │
//! │  │  Handshake  │     │  Connection │     │   IP Pool   │     │
//! │  │  Service    │     │  Registry   │     │   Service   │     │
//! │  └─────────────┘     └─────────────┘     └─────────────┘     │
//! │                                                               │
//! ├───────────────────────────────────────────────────────────────┤
//! │                     Transport Layer                           │
//! │  ┌─────────────────────┐     ┌─────────────────────────────┐ │
//! │  │  Stream Listener    │     │       UDP Transport         │ │
//! │  │  (control packets)  │     │   (encrypted datagrams)     │ │
//! │  └─────────────────────┘     └─────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//! Client → TCP → Handshake → Registry
//! Client → UDP → Decrypt (session key) → PayloadSink
//! Caller → send_datagram → Encrypt (session key) → UDP → Client
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Forwarding decrypted payload onto a network is the sink's job
//! - Configuration changes require restart (no hot-reload)
//!
//! ## Last Modified
//! v0.1.0 - Initial server library

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod server;
pub mod services;
pub mod stats;

// Re-export primary types
pub use config::ServerConfig;
pub use error::{HandshakeError, Result, ServerError};
pub use events::ConnectionEvent;
pub use handlers::{ChannelSink, LoggingSink, PayloadSink};
pub use server::{ServerHandle, TunnelServer};
pub use services::{IdentityResolver, StaticIdentityResolver};
pub use stats::ServerStatsSnapshot;
