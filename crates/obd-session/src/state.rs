//! Connection state machine

use obd_scheduler::LiveSample;
use serde::Serialize;
use std::fmt;

/// Lifecycle of a session.
///
/// ```text
/// Disconnected -> Connecting -> Connected <-> Polling
///                     |             |            |
///                     +-----------> Error <------+
/// ```
///
/// Any state returns to `Disconnected` on request. `Error` is left only
/// through a new connect attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Polling,
    /// The link failed; carries the reason
    Error(String),
}

impl ConnectionState {
    /// Whether a transport is open
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Polling)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Polling => f.write_str("polling"),
            ConnectionState::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// Notification delivered to session subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session moved to a new state
    State(ConnectionState),
    /// A value arrived from a polling tick
    Sample(LiveSample),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Polling.to_string(), "polling");
        assert_eq!(
            ConnectionState::Error("link lost".to_string()).to_string(),
            "error: link lost"
        );
    }

    #[test]
    fn test_is_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Polling.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Error(String::new()).is_connected());
    }
}
