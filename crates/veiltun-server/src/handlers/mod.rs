// ============================================
// File: crates/veiltun-server/src/handlers/mod.rs
// ============================================
//! # Handlers
//!
//! ## Creation Reason
//! Per-channel processing once a peer is established.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`control`]: Control stream loop after the handshake
//! - [`datagram`]: Datagram decryption and encryption
//! - [`sink`]: Destinations for decrypted tunnel payload
//!
//! ## Data Flow
//! ```text
//! Control stream:
//!   KEEP_ALIVE → touch, echo
//!   DISCONNECT / EOF / bad packet → registry.remove(reason)
//!
//! Datagram:
//!   1. Lookup connection by source address
//!   2. Decrypt with session cipher
//!   3. Record activity
//!   4. Hand payload to the sink
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The datagram path is the hot path; keep it free of awaits
//!
//! ## Last Modified
//! v0.1.0 - Initial handlers structure

pub mod control;
pub mod datagram;
pub mod sink;

pub use control::{run_control_loop, ControlExit};
pub use datagram::{DatagramDisposition, DatagramHandler};
pub use sink::{ChannelSink, LoggingSink, PayloadSink};
