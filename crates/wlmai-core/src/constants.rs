//! Protocol constants shared across crates.

/// Stop reason stamped on every history-sourced entry.
///
/// History turns are complete by construction; the sentinel keeps them from
/// ever being treated as an open (writing) BOT turn.
pub const COMPLETED_STOP_REASON: &str = "COMPLETED";

/// Stop reason stamped on locally synthesized ERROR turns.
pub const LOCAL_ERROR_STOP_REASON: &str = "CONNECTION_FAILED";

/// Answer text of the ERROR turn injected after the connection retry budget
/// is exhausted.
pub const GENERAL_ERROR_MESSAGE: &str =
    "Something went wrong while connecting to the assistant. Please try again.";

/// Prefix required on the bearer credential.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Stop reason stamped when the transport closes in the middle of an answer.
pub const INTERRUPTED_STOP_REASON: &str = "CONNECTION_CLOSED";
