// ============================================
// File: crates/veiltun-server/src/events.rs
// ============================================
//! # Connection Lifecycle Events
//!
//! Published by the `ConnectionRegistry` on a broadcast channel. A
//! subscriber that falls behind sees `RecvError::Lagged`; events are
//! notifications, not a log.

use serde::Serialize;

use veiltun_common::{ClientId, UserId};

/// Connection lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// A connection reached ESTABLISHED and was registered.
    Connected {
        /// Stream peer address
        client_id: ClientId,
        /// Authenticated user
        user_id: UserId,
    },

    /// A connection left the registry.
    Disconnected {
        /// Stream peer address
        client_id: ClientId,
        /// Authenticated user
        user_id: UserId,
        /// Why it was removed (`"client disconnect"`, `"idle timeout"`, ...)
        reason: String,
    },
}

impl ConnectionEvent {
    /// The client this event is about.
    #[must_use]
    pub const fn client_id(&self) -> ClientId {
        match self {
            Self::Connected { client_id, .. } | Self::Disconnected { client_id, .. } => *client_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_tagged() {
        let event = ConnectionEvent::Disconnected {
            client_id: "127.0.0.1:4000".parse().unwrap(),
            user_id: UserId::new("alice").unwrap(),
            reason: "idle timeout".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "disconnected");
        assert_eq!(json["user_id"], "alice");
        assert_eq!(json["client_id"], "127.0.0.1:4000");
        assert_eq!(event.client_id().port(), 4000);
    }
}
