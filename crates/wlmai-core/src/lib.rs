//! # wlmai-core
//!
//! Foundation types shared by the knowledge-base chat transport.
//!
//! - **Branded IDs**: [`ChatId`], [`KnowledgeBaseId`] as newtypes for type safety
//! - **Messages**: [`ChatMessage`] log entries and the [`ChatHistory`] wire shape
//! - **Prompts**: [`PromptItem`], the display-facing USER/BOT projection
//! - **Connection**: [`ConnectionState`] and its legal transitions
//! - **Errors**: [`ChatError`] hierarchy via `thiserror`
//! - **Retry**: [`RetryConfig`] and backoff math
//! - **Logging**: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod connection;
pub mod constants;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod prompt;
pub mod retry;

pub use connection::ConnectionState;
pub use errors::{ChatError, Result};
pub use ids::{ChatId, KnowledgeBaseId};
pub use messages::{
    ChatHistory, ChatMessage, FileData, HistoryResponse, MessageType, ServerMessage, now_millis,
};
pub use prompt::{PromptItem, UserType};
pub use retry::{BackoffStrategy, RetryConfig};
