// ============================================
// File: crates/veiltun-transport/src/lib.rs
// ============================================
//! # VeilTun Transport - Network I/O Layer
//!
//! ## Creation Reason
//! Provides the socket layer of the tunnel endpoint: a TCP listener and
//! frame reader for the control channel, and a UDP transport for the
//! encrypted datagram channel.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: `DatagramTransport` trait
//! - [`udp`]: UDP socket implementation
//! - [`stream`]: `StreamListener` and `FrameReader`
//! - [`socket`]: shared socket construction
//! - [`error`]: Transport-specific error types
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              veiltun-server                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   veiltun-core         veiltun-transport            │
//! │                        You are here ◄──             │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │             veiltun-common                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This crate knows nothing about packet formats; it moves bytes
//! - All I/O is async (Tokio)
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod socket;
pub mod stream;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use socket::SocketOptions;
pub use stream::{FrameReader, StreamListener};
pub use traits::{DatagramTransport, PacketSource};
pub use udp::UdpTransport;
