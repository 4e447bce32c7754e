// ============================================
// File: crates/veiltun-server/src/services/registry.rs
// ============================================
//! # Connection Registry
//!
//! ## Creation Reason
//! Tracks every established connection, keyed by the peer address of its
//! control stream. The datagram loop, the per-connection control tasks
//! and the cleanup task all reach connections through here.
//!
//! ## Main Functionality
//! - `Connection`: one established tunnel (identity, session cipher,
//!   leased address, status, activity counters)
//! - `ConnectionRegistry`: register/lookup/remove with a capacity cap
//! - `ConnectionInfo`: serializable snapshot for introspection
//! - Lifecycle events on a broadcast channel
//!
//! ## Connection Lifecycle
//! ```text
//! Handshake ESTABLISHED
//!        │
//!        ▼
//!   register() ──► Connected ──(datagrams, keep-alives)──► Connected
//!                                   │
//!          client disconnect / EOF / idle timeout / shutdown
//!                                   │
//!                                   ▼
//!                     remove() ──► Disconnecting ──► Disconnected
//!                        │
//!                        └── "protocol error: ..." ──► Error
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `register` holds `insert_lock` across the capacity check and the
//!   insert; removals do not need it
//! - A `Connection` owns its `IpLease`: the address returns to the pool
//!   when the last `Arc<Connection>` is dropped
//! - `Disconnected` is emitted only by the caller whose `remove` actually
//!   took the entry out of the map, so it fires once per connection
//!
//! ## Last Modified
//! v0.1.0 - Initial connection registry

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use veiltun_common::{AtomicInstant, ClientId, SessionId, Timestamp, UserId};
use veiltun_core::TunnelCipher;

use crate::error::{Result, ServerError};
use crate::events::ConnectionEvent;
use crate::services::ip_pool::IpLease;

/// Buffered events per subscriber before it starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Reason prefix that marks a removal as an error.
const ERROR_REASON_PREFIX: &str = "protocol error";

// ============================================
// Connection Status
// ============================================

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Built from a handshake outcome, not yet registered.
    Connecting,
    /// Registered and accepting datagrams.
    Connected,
    /// Being removed.
    Disconnecting,
    /// Removed cleanly.
    Disconnected,
    /// Removed because of a protocol error.
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Error => write!(f, "error"),
        }
    }
}

// ============================================
// Connection
// ============================================

/// One established tunnel.
pub struct Connection {
    /// Peer address of the control stream; also the datagram source.
    pub client_id: ClientId,
    /// Authenticated user.
    pub user_id: UserId,
    /// Session id sent in AUTH_RESPONSE.
    pub session_id: SessionId,
    /// When the handshake completed.
    pub connected_at: Timestamp,
    lease: IpLease,
    cipher: TunnelCipher,
    status: RwLock<ConnectionStatus>,
    last_activity: AtomicInstant,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
}

impl Connection {
    /// Creates a connection in the `Connecting` state.
    #[must_use]
    pub fn new(
        client_id: ClientId,
        user_id: UserId,
        session_id: SessionId,
        lease: IpLease,
        cipher: TunnelCipher,
    ) -> Self {
        Self {
            client_id,
            user_id,
            session_id,
            connected_at: Timestamp::now(),
            lease,
            cipher,
            status: RwLock::new(ConnectionStatus::Connecting),
            last_activity: AtomicInstant::now(),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.write() = status;
    }

    /// Tunnel address assigned to the client.
    #[must_use]
    pub const fn assigned_ip(&self) -> Ipv4Addr {
        self.lease.ip()
    }

    /// Cipher for this connection's datagrams.
    #[must_use]
    pub const fn cipher(&self) -> &TunnelCipher {
        &self.cipher
    }

    /// Marks the connection as active now.
    pub fn touch(&self) {
        self.last_activity.touch();
    }

    /// Time since the last activity.
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Returns `true` if idle for longer than `timeout`.
    #[must_use]
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.has_elapsed(timeout)
    }

    /// Records traffic and touches activity.
    pub fn record_activity(&self, bytes_in: u64, bytes_out: u64) {
        self.bytes_received.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes_out, Ordering::Relaxed);
        self.touch();
    }

    /// Total datagram payload bytes received from the client.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Total datagram payload bytes sent to the client.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Serializable snapshot.
    #[must_use]
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            client_id: self.client_id,
            user_id: self.user_id.clone(),
            assigned_ip: self.assigned_ip(),
            status: self.status(),
            connected_at: self.connected_at,
            idle_secs: self.idle_time().as_secs(),
            bytes_received: self.bytes_received(),
            bytes_sent: self.bytes_sent(),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("client_id", &self.client_id)
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .field("assigned_ip", &self.assigned_ip())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Peer address of the control stream.
    pub client_id: ClientId,
    /// Authenticated user.
    pub user_id: UserId,
    /// Tunnel address assigned to the client.
    pub assigned_ip: Ipv4Addr,
    /// Status at snapshot time.
    pub status: ConnectionStatus,
    /// When the handshake completed.
    pub connected_at: Timestamp,
    /// Whole seconds since the last activity.
    pub idle_secs: u64,
    /// Payload bytes received.
    pub bytes_received: u64,
    /// Payload bytes sent.
    pub bytes_sent: u64,
}

// ============================================
// ConnectionRegistry
// ============================================

/// All established connections.
pub struct ConnectionRegistry {
    connections: DashMap<ClientId, Arc<Connection>>,
    max_connections: usize,
    insert_lock: Mutex<()>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionRegistry {
    /// Creates an empty registry holding at most `max_connections`.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            connections: DashMap::new(),
            max_connections,
            insert_lock: Mutex::new(()),
            events,
        }
    }

    /// Registers an established connection and emits `Connected`.
    ///
    /// On failure `connection` is dropped, which releases its address.
    ///
    /// # Errors
    /// - `CapacityExceeded` if the registry is full
    /// - `AlreadyRegistered` if `client_id` is present
    pub fn register(&self, client_id: ClientId, connection: Connection) -> Result<Arc<Connection>> {
        let _guard = self.insert_lock.lock();

        if self.connections.len() >= self.max_connections {
            return Err(ServerError::CapacityExceeded {
                limit: self.max_connections,
            });
        }

        let connection = match self.connections.entry(client_id) {
            Entry::Occupied(_) => return Err(ServerError::AlreadyRegistered(client_id)),
            Entry::Vacant(slot) => {
                connection.set_status(ConnectionStatus::Connected);
                connection.touch();
                Arc::clone(slot.insert(Arc::new(connection)).value())
            }
        };

        info!(
            client = %client_id,
            user_id = %connection.user_id,
            session_id = %connection.session_id,
            assigned_ip = %connection.assigned_ip(),
            "Connection registered"
        );

        let _ = self.events.send(ConnectionEvent::Connected {
            client_id,
            user_id: connection.user_id.clone(),
        });

        Ok(connection)
    }

    /// Returns the connection for `client_id`, if any.
    #[must_use]
    pub fn get(&self, client_id: &ClientId) -> Option<Arc<Connection>> {
        self.connections.get(client_id).map(|r| Arc::clone(r.value()))
    }

    /// Returns the connection for `client_id`.
    ///
    /// # Errors
    /// `ConnectionNotFound` if absent.
    pub fn lookup(&self, client_id: &ClientId) -> Result<Arc<Connection>> {
        self.get(client_id)
            .ok_or(ServerError::ConnectionNotFound(*client_id))
    }

    /// Records traffic for `client_id` and touches its activity.
    ///
    /// # Errors
    /// `ConnectionNotFound` if absent.
    pub fn update_activity(&self, client_id: &ClientId, bytes_in: u64, bytes_out: u64) -> Result<()> {
        self.lookup(client_id)?.record_activity(bytes_in, bytes_out);
        Ok(())
    }

    /// Removes `client_id`, emitting `Disconnected` with `reason`.
    ///
    /// Reasons starting with `"protocol error"` leave the connection in
    /// `Error`; anything else ends in `Disconnected`.
    pub fn remove(&self, client_id: &ClientId, reason: &str) -> Option<Arc<Connection>> {
        let (_, connection) = self.connections.remove(client_id)?;

        if reason.starts_with(ERROR_REASON_PREFIX) {
            connection.set_status(ConnectionStatus::Error);
        } else {
            connection.set_status(ConnectionStatus::Disconnecting);
            connection.set_status(ConnectionStatus::Disconnected);
        }

        info!(
            client = %client_id,
            user_id = %connection.user_id,
            assigned_ip = %connection.assigned_ip(),
            bytes_received = connection.bytes_received(),
            bytes_sent = connection.bytes_sent(),
            reason,
            "Connection removed"
        );

        let _ = self.events.send(ConnectionEvent::Disconnected {
            client_id: *client_id,
            user_id: connection.user_id.clone(),
            reason: reason.to_string(),
        });

        Some(connection)
    }

    /// Removes every connection with the same `reason`.
    pub fn remove_all(&self, reason: &str) -> usize {
        let ids: Vec<ClientId> = self.connections.iter().map(|r| *r.key()).collect();
        ids.iter()
            .filter(|id| self.remove(id, reason).is_some())
            .count()
    }

    /// Removes connections idle for longer than `timeout`.
    pub fn expire_idle(&self, timeout: Duration) -> Vec<ClientId> {
        let expired: Vec<ClientId> = self
            .connections
            .iter()
            .filter(|r| r.value().is_expired(timeout))
            .map(|r| *r.key())
            .collect();

        let removed: Vec<ClientId> = expired
            .into_iter()
            .filter(|id| {
                debug!(client = %id, "Connection idle");
                self.remove(id, "idle timeout").is_some()
            })
            .collect();

        if !removed.is_empty() {
            info!("Expired {} idle connections", removed.len());
        }

        removed
    }

    /// Snapshots every connection.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.connections.iter().map(|r| r.value().info()).collect()
    }

    /// Occupancy as a percentage of `max_connections` (0–100).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn load(&self) -> f64 {
        if self.max_connections == 0 {
            return 100.0;
        }
        (self.len() as f64 / self.max_connections as f64 * 100.0).min(100.0)
    }

    /// Returns `true` if another connection would fit right now.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.len() < self.max_connections
    }

    /// Configured maximum.
    #[must_use]
    pub const fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Subscribes to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

// ============================================
// Tests
// ============================================
