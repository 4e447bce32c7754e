// ============================================
// File: crates/veiltun-common/src/lib.rs
// ============================================
//! # VeilTun Common - Shared Utilities Library
//!
//! ## Creation Reason
//! Provides foundational types and utilities shared across all VeilTun crates,
//! so that identifiers and timestamps have one representation everywhere.
//!
//! ## Main Functionality
//! - [`types`]: Identifier types (`SessionId`, `UserId`, `ClientId`)
//! - [`time`]: Atomic instants and unix-time helpers
//! - [`error`]: Common error types and result aliases
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              veiltun-server                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   veiltun-core         veiltun-transport            │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │             veiltun-common  ◄── You are here        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This crate is the foundation - changes affect everything
//! - Keep dependencies minimal
//! - Security-sensitive types must implement Zeroize
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod time;
pub mod types;

pub use error::{CommonError, Result};
pub use time::{AtomicInstant, Timestamp};
pub use types::{ClientId, SessionId, UserId};
