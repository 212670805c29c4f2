//! Broker session state machine.

/// Lifecycle state of a broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum SessionState {
    /// CONNECT sent, waiting for CONNACK.
    #[default]
    Connecting,
    /// CONNACK accepted; operations allowed.
    Connected,
    /// DISCONNECT sent by us.
    Disconnecting,
    /// Stream is gone.
    Closed,
}

impl SessionState {
    /// Check if publish/subscribe operations are allowed in this state.
    #[must_use]
    #[inline]
    pub const fn can_operate(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    /// Check if inbound packets are still processed in this state.
    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Disconnecting)
    }

    /// Check if the session is not yet closed.
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        !matches!(self, SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Connected => write!(f, "Connected"),
            SessionState::Disconnecting => write!(f, "Disconnecting"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert_eq!(SessionState::default(), SessionState::Connecting);
    }

    #[test]
    fn test_can_operate_in_each_state() {
        assert!(!SessionState::Connecting.can_operate());
        assert!(SessionState::Connected.can_operate());
        assert!(!SessionState::Disconnecting.can_operate());
        assert!(!SessionState::Closed.can_operate());
    }

    #[test]
    fn test_can_receive_in_each_state() {
        assert!(!SessionState::Connecting.can_receive());
        assert!(SessionState::Connected.can_receive());
        assert!(SessionState::Disconnecting.can_receive());
        assert!(!SessionState::Closed.can_receive());
    }

    #[test]
    fn test_is_active() {
        assert!(SessionState::Connecting.is_active());
        assert!(SessionState::Connected.is_active());
        assert!(SessionState::Disconnecting.is_active());
        assert!(!SessionState::Closed.is_active());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Connected.to_string(), "Connected");
        assert_eq!(SessionState::Closed.to_string(), "Closed");
    }
}
