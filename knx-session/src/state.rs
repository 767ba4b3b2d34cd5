//! Connection state machine states

use knx_core::{KnxError, KnxResult};

/// Connection state
///
/// Tracks the lifecycle of a tunnel connection so operations are only
/// performed in the state they belong to.
///
/// # State Transitions
/// ```text
/// Idle -> Discovering          (no gateway endpoint configured)
/// Idle -> Connecting           (gateway endpoint configured)
/// Discovering -> Connecting    (gateway found)
/// Discovering -> Closed        (no gateway responded)
/// Connecting -> Connected      (Connect response, channel granted)
/// Connecting -> Closed         (Connect failed)
/// Connected -> Disconnecting   (explicit close, heartbeat failure,
///                               or gateway-initiated disconnect)
/// Disconnecting -> Closed      (acknowledged or best-effort timeout)
/// ```
///
/// `Closed` is terminal; no further sends are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt has started yet (initial state)
    Idle,
    /// A Search request is out on the discovery channel
    Discovering,
    /// A Connect request is out on the control channel
    Connecting,
    /// Channel negotiated; heartbeat running, tunneling enabled
    Connected,
    /// Teardown in progress; a Disconnect exchange may still be pending
    Disconnecting,
    /// Terminal state; all communicators are closed
    Closed,
}

impl ConnectionState {
    /// Check if tunneling requests may be sent
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Check if the connection is in its terminal state
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    /// Check if teardown has begun
    pub fn is_tearing_down(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnecting | ConnectionState::Closed
        )
    }

    /// Validate a state transition
    ///
    /// # Errors
    /// Returns `KnxError::InvalidData` for transitions outside the
    /// lifecycle diagram
    pub fn validate_transition(&self, new_state: ConnectionState) -> KnxResult<()> {
        use ConnectionState::*;
        let valid = match (*self, new_state) {
            (Idle, Discovering) => true,
            (Idle, Connecting) => true,
            (Discovering, Connecting) => true,
            (Discovering, Closed) => true,
            (Connecting, Connected) => true,
            (Connecting, Closed) => true,
            (Connected, Disconnecting) => true,
            (Disconnecting, Closed) => true,
            // Idempotent close
            (Closed, Closed) => true,
            _ => false,
        };
        if valid {
            Ok(())
        } else {
            Err(KnxError::InvalidData(format!(
                "Invalid state transition: {:?} -> {:?}",
                self, new_state
            )))
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Discovering => "Discovering",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnecting => "Disconnecting",
            ConnectionState::Closed => "Closed",
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use ConnectionState::*;
        assert!(Idle.validate_transition(Discovering).is_ok());
        assert!(Idle.validate_transition(Connecting).is_ok());
        assert!(Discovering.validate_transition(Connecting).is_ok());
        assert!(Connecting.validate_transition(Connected).is_ok());
        assert!(Connected.validate_transition(Disconnecting).is_ok());
        assert!(Disconnecting.validate_transition(Closed).is_ok());
        assert!(Closed.validate_transition(Closed).is_ok());
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        use ConnectionState::*;
        assert!(Idle.validate_transition(Connected).is_err());
        assert!(Connected.validate_transition(Connecting).is_err());
        assert!(Closed.validate_transition(Connecting).is_err());
        assert!(Disconnecting.validate_transition(Connected).is_err());
    }

    #[test]
    fn test_predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::Closed.is_closed());
        assert!(ConnectionState::Disconnecting.is_tearing_down());
    }
}
