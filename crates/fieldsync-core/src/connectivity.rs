//! Connectivity state machine
//!
//! A single process-wide value owned by the engine. No transition is ever
//! triggered by a network signal: the application tells the engine what to do
//! via `go_offline()`/`go_online()`, and replay settlement moves
//! `Reconnecting` back to `Online`.
//!
//! | From         | Event                        | To           |
//! |--------------|------------------------------|--------------|
//! | Online       | `go_offline()`               | Offline      |
//! | Offline      | `go_online()`                | Reconnecting |
//! | Reconnecting | replay settles (ok or not)   | Online       |
//!
//! There is no partially-offline state: a replay in progress still accepts
//! new offline writes into the queues.

use std::fmt;

/// Connectivity state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// Edits go directly to the remote service
    Online,
    /// Edits are enqueued locally
    Offline,
    /// Queued edits are being sent to the remote service; new writes still
    /// enqueue locally
    Reconnecting,
}

impl Default for ConnectivityState {
    fn default() -> Self {
        ConnectivityState::Online
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityState::Online => write!(f, "online"),
            ConnectivityState::Offline => write!(f, "offline"),
            ConnectivityState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

impl ConnectivityState {
    /// Whether a write operation should be enqueued locally instead of
    /// forwarded to the remote service
    pub fn should_enqueue(&self) -> bool {
        !matches!(self, ConnectivityState::Online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_online() {
        assert_eq!(ConnectivityState::default(), ConnectivityState::Online);
    }

    #[test]
    fn test_enqueue_policy() {
        assert!(!ConnectivityState::Online.should_enqueue());
        assert!(ConnectivityState::Offline.should_enqueue());
        assert!(ConnectivityState::Reconnecting.should_enqueue());
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectivityState::Reconnecting.to_string(), "reconnecting");
    }
}
