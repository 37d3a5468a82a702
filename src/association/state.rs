use std::fmt;

/// Association state, per RFC 4960 §4.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AssociationState {
    Closed,
    CookieWait,
    CookieEchoed,
    Established,
    ShutdownPending,
    ShutdownSent,
    ShutdownReceived,
    ShutdownAckSent,
}

impl Default for AssociationState {
    fn default() -> Self {
        AssociationState::Closed
    }
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            AssociationState::Closed => "Closed",
            AssociationState::CookieWait => "CookieWait",
            AssociationState::CookieEchoed => "CookieEchoed",
            AssociationState::Established => "Established",
            AssociationState::ShutdownPending => "ShutdownPending",
            AssociationState::ShutdownSent => "ShutdownSent",
            AssociationState::ShutdownReceived => "ShutdownReceived",
            AssociationState::ShutdownAckSent => "ShutdownAckSent",
        };
        write!(f, "{}", s)
    }
}

/// Delayed-SACK transmission state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum AckState {
    Idle,
    Immediate,
    Delay,
}

impl Default for AckState {
    fn default() -> Self {
        AckState::Idle
    }
}
