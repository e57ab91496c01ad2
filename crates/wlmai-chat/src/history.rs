//! REST collaborator for persisted chat history.
//!
//! History is fetched per knowledge base, flattened into log-shaped
//! [`ChatMessage`]s (owning chat attached, no index, completed stop reason)
//! and cached until a refetch or a delete invalidates it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::header::AUTHORIZATION;
use tracing::{debug, info, warn};
use wlmai_core::{ChatError, ChatId, ChatMessage, HistoryResponse, KnowledgeBaseId, Result};
use wlmai_settings::ApiSettings;

use crate::endpoint;

/// Flattened history of one knowledge base.
pub type HistoryMessages = Arc<Vec<ChatMessage>>;

/// Fetches, caches and deletes persisted chats.
pub struct HistoryClient {
    http: reqwest::Client,
    api: ApiSettings,
    token: RwLock<String>,
    cache: RwLock<HashMap<KnowledgeBaseId, HistoryMessages>>,
}

impl HistoryClient {
    /// Create a client with its own HTTP connection pool.
    pub fn new(api: &ApiSettings, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(api.request_timeout_ms))
            .build()
            .map_err(|e| ChatError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http, api, token))
    }

    /// Create a client on top of an existing `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, api: &ApiSettings, token: &str) -> Self {
        Self {
            http,
            api: api.clone(),
            token: RwLock::new(token.to_owned()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the access token used for later requests.
    pub fn set_token(&self, token: &str) {
        *self.token.write() = token.to_owned();
    }

    /// Fetch history from the server and refresh the cache.
    pub async fn fetch_history(&self, knowledge_base_id: &KnowledgeBaseId) -> Result<HistoryMessages> {
        let url = endpoint::history_url(&self.api, knowledge_base_id)?;
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(kb = %knowledge_base_id, status = status.as_u16(), "history fetch failed");
            return Err(ChatError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        let parsed: HistoryResponse = serde_json::from_slice(&body)?;
        let chats = parsed.history.len();
        let messages: HistoryMessages = Arc::new(
            parsed
                .history
                .into_iter()
                .flat_map(wlmai_core::ChatHistory::into_messages)
                .collect(),
        );
        info!(kb = %knowledge_base_id, chats, entries = messages.len(), "history fetched");

        let _ = self
            .cache
            .write()
            .insert(knowledge_base_id.clone(), messages.clone());
        Ok(messages)
    }

    /// Cached history, fetching it first if there is none.
    pub async fn history(&self, knowledge_base_id: &KnowledgeBaseId) -> Result<HistoryMessages> {
        if let Some(cached) = self.cached_history(knowledge_base_id) {
            return Ok(cached);
        }
        self.fetch_history(knowledge_base_id).await
    }

    /// Cached history, if any.
    pub fn cached_history(&self, knowledge_base_id: &KnowledgeBaseId) -> Option<HistoryMessages> {
        self.cache.read().get(knowledge_base_id).cloned()
    }

    /// Delete one persisted chat; the cached history is invalidated.
    pub async fn delete_chat(
        &self,
        knowledge_base_id: &KnowledgeBaseId,
        chat_id: &ChatId,
    ) -> Result<()> {
        let url = endpoint::chat_resource_url(&self.api, knowledge_base_id, chat_id)?;
        let response = self
            .http
            .delete(url)
            .header(AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(kb = %knowledge_base_id, %chat_id, status = status.as_u16(), "chat delete failed");
            return Err(ChatError::Http {
                status: status.as_u16(),
                message,
            });
        }

        info!(kb = %knowledge_base_id, %chat_id, "chat deleted");
        self.invalidate(knowledge_base_id);
        Ok(())
    }

    /// Forget the cached history of a knowledge base.
    pub fn invalidate(&self, knowledge_base_id: &KnowledgeBaseId) {
        if self.cache.write().remove(knowledge_base_id).is_some() {
            debug!(kb = %knowledge_base_id, "history cache invalidated");
        }
    }

    fn authorization(&self) -> String {
        endpoint::bearer(&self.token.read())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
