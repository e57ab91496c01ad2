//! Connection lifecycle states.
//!
//! ```text
//! CLOSED ──► CONNECTING ──► OPEN ──► CLOSED
//!               │   ▲
//!               ▼   │
//!             RETRYING ──► FAILED ──► CONNECTING (next ensure)
//! ```
//!
//! Cancellation (chat switch) may move any non-closed state to `CLOSED`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of the single session-scoped connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No live transport.
    #[default]
    Closed,
    /// A handshake is in flight.
    Connecting,
    /// Handshake done; frames may be sent.
    Open,
    /// Last handshake failed; waiting before the next attempt.
    Retrying,
    /// Retry budget exhausted.
    Failed,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Closed, Connecting, Failed, Open, Retrying};
        matches!(
            (self, next),
            (Closed | Retrying | Failed, Connecting)
                | (Connecting, Open | Retrying | Failed)
                | (Retrying, Failed)
                | (Connecting | Open | Retrying | Failed, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Open => write!(f, "OPEN"),
            Self::Retrying => write!(f, "RETRYING"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}
