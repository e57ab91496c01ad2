//! Chat session facade.
//!
//! Binds one knowledge base and access token to a current chat and wires
//! the connection, the live log and the history client together:
//!
//! - `send_message` shows the question immediately as a pending turn,
//!   connects on demand and sends the raw question text.
//! - Only one turn may be open per chat; a second question while an answer
//!   streams is rejected.
//! - Switching chats tears the connection down and discards the live logs
//!   of both chats (history is the source of truth for finished turns).

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use wlmai_core::{ChatError, ChatId, ChatMessage, KnowledgeBaseId, PromptItem, Result};
use wlmai_settings::ChatSettings;

use crate::connection::{ConnectionManager, ConnectionTarget};
use crate::dispatcher::{LogUpdates, MessageDispatcher};
use crate::history::{HistoryClient, HistoryMessages};
use crate::reconciler::{group_by_chat, reconcile};

/// What happened to a submitted question.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The question went out over the open connection.
    Sent,
    /// No connection could be established; an ERROR turn was logged unless
    /// the attempt was cancelled.
    NotConnected,
    /// Blank question; nothing happened.
    Ignored,
}

/// One user's conversation surface over a knowledge base.
pub struct ChatSession {
    knowledge_base_id: KnowledgeBaseId,
    token: RwLock<String>,
    chat_id: RwLock<ChatId>,
    pending: Mutex<Option<ChatMessage>>,
    dispatcher: Arc<MessageDispatcher>,
    connection: Arc<ConnectionManager>,
    history: Arc<HistoryClient>,
}

impl ChatSession {
    /// Create a session that talks to the configured service.
    pub fn new(
        settings: &ChatSettings,
        knowledge_base_id: impl Into<KnowledgeBaseId>,
        chat_id: impl Into<ChatId>,
        token: &str,
    ) -> Result<Self> {
        let dispatcher = Arc::new(MessageDispatcher::new());
        let connection = Arc::new(ConnectionManager::with_websocket(settings, dispatcher.clone()));
        let history = Arc::new(HistoryClient::new(&settings.api, token)?);
        Ok(Self::from_parts(
            knowledge_base_id,
            chat_id,
            token,
            dispatcher,
            connection,
            history,
        ))
    }

    /// Assemble a session from existing components.
    ///
    /// `connection` must append into `dispatcher`.
    pub fn from_parts(
        knowledge_base_id: impl Into<KnowledgeBaseId>,
        chat_id: impl Into<ChatId>,
        token: &str,
        dispatcher: Arc<MessageDispatcher>,
        connection: Arc<ConnectionManager>,
        history: Arc<HistoryClient>,
    ) -> Self {
        Self {
            knowledge_base_id: knowledge_base_id.into(),
            token: RwLock::new(token.to_owned()),
            chat_id: RwLock::new(chat_id.into()),
            pending: Mutex::new(None),
            dispatcher,
            connection,
            history,
        }
    }

    /// Current chat.
    pub fn chat_id(&self) -> ChatId {
        self.chat_id.read().clone()
    }

    /// Knowledge base this session is bound to.
    pub fn knowledge_base_id(&self) -> &KnowledgeBaseId {
        &self.knowledge_base_id
    }

    /// The connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// The live log.
    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    /// Replace the access token.
    ///
    /// Takes effect for REST calls immediately and for the stream on the
    /// next connection.
    pub fn set_token(&self, token: &str) {
        *self.token.write() = token.to_owned();
        self.history.set_token(token);
    }

    /// Subscribe to live log appends (all chats).
    pub fn subscribe(&self) -> LogUpdates {
        self.dispatcher.subscribe()
    }

    /// Whether a question may be submitted now.
    pub fn can_send(&self) -> bool {
        let chat_id = self.chat_id();
        if chat_id.is_empty() || self.knowledge_base_id.is_empty() {
            return false;
        }
        let mut pending = self.pending.lock();
        self.prune_pending(&chat_id, &mut pending);
        pending.is_none() && !self.dispatcher.has_open_turn(&chat_id)
    }

    /// Submit a question in the current chat.
    pub async fn send_message(&self, question: &str) -> Result<SendOutcome> {
        if question.trim().is_empty() {
            debug!("ignoring blank question");
            return Ok(SendOutcome::Ignored);
        }

        let chat_id = self.chat_id();
        let target = ConnectionTarget::new(
            chat_id.clone(),
            self.knowledge_base_id.clone(),
            self.token.read().clone(),
        );
        target.validate()?;

        let entry = {
            let mut pending = self.pending.lock();
            self.prune_pending(&chat_id, &mut pending);
            if pending.is_some() || self.dispatcher.has_open_turn(&chat_id) {
                return Err(ChatError::AnswerInFlight { chat_id });
            }
            let index = self.dispatcher.last_index(&chat_id) + 1;
            let entry = ChatMessage::pending(chat_id.clone(), question, index);
            *pending = Some(entry.clone());
            entry
        };

        let readiness = self.connection.ensure_connection_for(&target, question).await;
        if !readiness.is_ready() {
            self.clear_pending(&chat_id);
            return Ok(SendOutcome::NotConnected);
        }

        // A stream that dies before the first fragment closes this turn.
        self.dispatcher.await_answer(entry);
        if let Err(e) = self.connection.send(question).await {
            self.dispatcher.cancel_awaited(&chat_id);
            self.clear_pending(&chat_id);
            return Err(e);
        }
        info!(%chat_id, len = question.len(), "question sent");
        Ok(SendOutcome::Sent)
    }

    /// Make `chat_id` the current chat.
    ///
    /// No-op when it already is. Otherwise the connection is closed and
    /// the live logs of the old and new chat are discarded.
    pub fn switch_chat(&self, chat_id: impl Into<ChatId>) {
        let chat_id = chat_id.into();
        let previous = std::mem::replace(&mut *self.chat_id.write(), chat_id.clone());
        if previous == chat_id {
            return;
        }
        info!(from = %previous, to = %chat_id, "switching chat");
        self.connection.close();
        *self.pending.lock() = None;
        self.dispatcher.reset_chat(&previous);
        self.dispatcher.reset_chat(&chat_id);
    }

    /// Start a fresh chat and make it current.
    pub fn new_chat(&self) -> ChatId {
        let chat_id = ChatId::generate();
        self.switch_chat(chat_id.clone());
        chat_id
    }

    /// Display sequence of the current chat.
    pub fn prompts(&self) -> Vec<PromptItem> {
        let chat_id = self.chat_id();
        let live = self.dispatcher.snapshot(&chat_id);
        let pending = {
            let mut pending = self.pending.lock();
            self.prune_pending(&chat_id, &mut pending);
            pending.clone()
        };
        let history = self
            .history
            .cached_history(&self.knowledge_base_id)
            .unwrap_or_default();
        reconcile(&chat_id, &history, &live, pending.as_ref())
    }

    /// Display sequences of every known chat, for a history listing.
    pub fn conversations(&self) -> Vec<(ChatId, Vec<PromptItem>)> {
        let live = self.dispatcher.snapshot(&self.chat_id());
        let history = self
            .history
            .cached_history(&self.knowledge_base_id)
            .unwrap_or_default();
        group_by_chat(&history, &live)
    }

    /// Refetch history.
    ///
    /// Once it arrives the current chat's live log is discarded, since the
    /// refetched history now holds those turns. The log is kept while an
    /// answer is still streaming.
    pub async fn refresh_history(&self) -> Result<HistoryMessages> {
        let history = self.history.fetch_history(&self.knowledge_base_id).await?;
        let chat_id = self.chat_id();
        if self.can_send() {
            self.dispatcher.reset_chat(&chat_id);
        } else {
            debug!(%chat_id, "answer streaming, keeping live log");
        }
        Ok(history)
    }

    /// Delete a persisted chat. Deleting the current chat starts a new one.
    pub async fn delete_chat(&self, chat_id: &ChatId) -> Result<()> {
        self.history
            .delete_chat(&self.knowledge_base_id, chat_id)
            .await?;
        self.dispatcher.reset_chat(chat_id);
        if *chat_id == self.chat_id() {
            let _ = self.new_chat();
        }
        Ok(())
    }

    /// Close the connection and finish any open turn of the current chat.
    pub fn close(&self) {
        self.connection.close();
        *self.pending.lock() = None;
        let _ = self.dispatcher.finalize_open_turn(&self.chat_id());
    }

    /// Drop the pending question once the log has caught up with it.
    fn prune_pending(&self, chat_id: &ChatId, pending: &mut Option<ChatMessage>) {
        let superseded = pending.as_ref().is_some_and(|p| {
            &p.chat_id != chat_id
                || p.index.is_some_and(|index| self.dispatcher.last_index(chat_id) >= index)
        });
        if superseded {
            *pending = None;
        }
    }

    fn clear_pending(&self, chat_id: &ChatId) {
        let mut pending = self.pending.lock();
        if pending.as_ref().is_some_and(|p| &p.chat_id == chat_id) {
            *pending = None;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
