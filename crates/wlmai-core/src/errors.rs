//! Error hierarchy for the chat transport.
//!
//! Only connection-establishment failures ever reach the end user, and they
//! do so as an ERROR turn in the log rather than as an `Err`. Everything in
//! [`ChatError`] is therefore either a caller mistake (send while not ready,
//! question while an answer streams) or a diagnostic for logs.

use thiserror::Error;

use crate::connection::ConnectionState;
use crate::ids::ChatId;

/// Errors produced by the chat transport.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A connection target field was empty.
    #[error("invalid connection target: {field} must not be empty")]
    InvalidTarget {
        /// Offending field name.
        field: &'static str,
    },

    /// `send` called while the connection is not open.
    #[error("connection not ready (state: {state})")]
    NotReady {
        /// State at the time of the call.
        state: ConnectionState,
    },

    /// A question was submitted while the previous answer is still streaming.
    #[error("an answer is still streaming in chat {chat_id}")]
    AnswerInFlight {
        /// Chat with the open turn.
        chat_id: ChatId,
    },

    /// The WebSocket handshake failed.
    #[error("handshake attempt {attempt} failed: {message}")]
    Handshake {
        /// 1-based attempt number.
        attempt: u32,
        /// Underlying failure.
        message: String,
    },

    /// The connection did not become ready within the readiness budget.
    #[error("connection not ready after {timeout_ms}ms")]
    ReadyTimeout {
        /// Budget that elapsed.
        timeout_ms: u64,
    },

    /// The established transport failed or closed.
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound frame did not match the message shape.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A REST collaborator answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// JSON (de)serialization failed.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The operation was cancelled by a close or chat switch.
    #[error("operation cancelled")]
    Cancelled,
}

impl ChatError {
    /// Whether another connection attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Handshake { .. } | Self::ReadyTimeout { .. } | Self::Transport(_)
        ) || matches!(self, Self::Http { status, .. } if *status >= 500 || *status == 429)
    }
}

/// Result type for chat operations.
pub type Result<T> = std::result::Result<T, ChatError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn handshake_is_retryable() {
        let err = ChatError::Handshake {
            attempt: 1,
            message: "connection refused".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "handshake attempt 1 failed: connection refused");
    }

    #[test]
    fn caller_mistakes_are_not_retryable() {
        assert!(!ChatError::NotReady { state: ConnectionState::Closed }.is_retryable());
        assert!(
            !ChatError::AnswerInFlight {
                chat_id: ChatId::from("c1")
            }
            .is_retryable()
        );
        assert!(!ChatError::Cancelled.is_retryable());
    }

    #[test]
    fn http_classification() {
        let server = ChatError::Http { status: 503, message: "down".into() };
        let auth = ChatError::Http { status: 401, message: "nope".into() };
        assert!(server.is_retryable());
        assert!(!auth.is_retryable());
    }

    #[test]
    fn not_ready_display_names_state() {
        let err = ChatError::NotReady { state: ConnectionState::Retrying };
        assert_eq!(err.to_string(), "connection not ready (state: RETRYING)");
    }

    #[test]
    fn json_error_converts() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: ChatError = json_err.into();
        assert_matches!(err, ChatError::Decode(_));
    }
}
