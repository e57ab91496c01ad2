//! # wlmai-chat
//!
//! Real-time chat transport for knowledge-base assistants.
//!
//! - [`connection`]: WebSocket transport seam and the single-flight,
//!   retrying [`ConnectionManager`]
//! - [`dispatcher`]: per-chat live log with monotonic indices
//! - [`reconciler`]: pure projection of history and live fragments into
//!   USER/BOT prompt pairs
//! - [`history`]: REST client for persisted chats
//! - [`session`]: the [`ChatSession`] facade tying it all together

#![deny(unsafe_code)]

pub mod connection;
pub mod dispatcher;
pub mod endpoint;
pub mod history;
pub mod reconciler;
pub mod session;

pub use connection::{
    ConnectionManager, ConnectionTarget, Connector, Link, LinkPeer, Readiness, TransportEvent,
    WsConnector,
};
pub use dispatcher::{LogUpdate, LogUpdates, MessageDispatcher, decode_frame};
pub use history::{HistoryClient, HistoryMessages};
pub use reconciler::{group_by_chat, is_continuation, reconcile};
pub use session::{ChatSession, SendOutcome};
