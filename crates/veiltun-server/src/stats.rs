// ============================================
// File: crates/veiltun-server/src/stats.rs
// ============================================
//! # Server Statistics
//!
//! Process-wide counters updated from the accept, connection and datagram
//! tasks. All counters are relaxed atomics; a snapshot is not a consistent
//! cut across counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Server-wide counters.
#[derive(Debug, Default)]
pub struct ServerStats {
    connections_accepted: AtomicU64,
    connections_rejected: AtomicU64,
    handshakes_completed: AtomicU64,
    handshakes_failed: AtomicU64,
    datagrams_received: AtomicU64,
    datagrams_sent: AtomicU64,
    datagrams_unknown_sender: AtomicU64,
    decrypt_failures: AtomicU64,
}

impl ServerStats {
    /// A stream was accepted and handed to a handshake.
    pub fn record_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// A stream was dropped at accept because the registry was full.
    pub fn record_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A handshake reached ESTABLISHED and was registered.
    pub fn record_handshake_completed(&self) {
        self.handshakes_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// A handshake failed or its registration was refused.
    pub fn record_handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A datagram arrived on the data socket.
    pub fn record_datagram_received(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    /// A datagram was sent to a client.
    pub fn record_datagram_sent(&self) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// A datagram came from an address with no registered connection.
    pub fn record_unknown_sender(&self) {
        self.datagrams_unknown_sender.fetch_add(1, Ordering::Relaxed);
    }

    /// A datagram failed to decrypt.
    pub fn record_decrypt_failure(&self) {
        self.decrypt_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies every counter.
    #[must_use]
    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            handshakes_completed: self.handshakes_completed.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_unknown_sender: self.datagrams_unknown_sender.load(Ordering::Relaxed),
            decrypt_failures: self.decrypt_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct ServerStatsSnapshot {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub handshakes_completed: u64,
    pub handshakes_failed: u64,
    pub datagrams_received: u64,
    pub datagrams_sent: u64,
    pub datagrams_unknown_sender: u64,
    pub decrypt_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = ServerStats::default();
        stats.record_accepted();
        stats.record_accepted();
        stats.record_rejected();
        stats.record_unknown_sender();
        stats.record_decrypt_failure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connections_accepted, 2);
        assert_eq!(snapshot.connections_rejected, 1);
        assert_eq!(snapshot.datagrams_unknown_sender, 1);
        assert_eq!(snapshot.decrypt_failures, 1);
        assert_eq!(snapshot.handshakes_completed, 0);
    }
}
