//! URL construction for the streaming and REST endpoints.
//!
//! ```text
//! {ws_base}/knowledge-bases/{kb}/v1/chats/{chat}?token=Bearer%20...
//! {http_base}/knowledge-bases/{kb}/v1/chats/history
//! {http_base}/knowledge-bases/{kb}/v1/chats/{chat}          (DELETE)
//! ```
//!
//! Path segments and the query value are percent-encoded by [`Url`].

use reqwest::Url;
use wlmai_core::constants::BEARER_PREFIX;
use wlmai_core::{ChatError, ChatId, KnowledgeBaseId, Result};
use wlmai_settings::ApiSettings;

/// Normalize a credential so it always carries the bearer prefix.
///
/// Tokens that already mention `Bearer` anywhere are passed through as-is.
pub fn bearer(token: &str) -> String {
    let token = token.trim();
    if token.contains("Bearer") {
        token.to_owned()
    } else {
        format!("{BEARER_PREFIX}{token}")
    }
}

/// Streaming endpoint for one chat, credential in the `token` query value.
pub fn chat_socket_url(
    api: &ApiSettings,
    knowledge_base_id: &KnowledgeBaseId,
    chat_id: &ChatId,
    token: &str,
) -> Result<Url> {
    let mut url = with_segments(
        &api.ws_base(),
        &[
            "knowledge-bases",
            knowledge_base_id.as_str(),
            "v1",
            "chats",
            chat_id.as_str(),
        ],
    )?;
    let _ = url.query_pairs_mut().append_pair("token", &bearer(token));
    Ok(url)
}

/// History listing for a knowledge base.
pub fn history_url(api: &ApiSettings, knowledge_base_id: &KnowledgeBaseId) -> Result<Url> {
    with_segments(
        &api.http_base(),
        &["knowledge-bases", knowledge_base_id.as_str(), "v1", "chats", "history"],
    )
}

/// Resource URL of one persisted chat.
pub fn chat_resource_url(
    api: &ApiSettings,
    knowledge_base_id: &KnowledgeBaseId,
    chat_id: &ChatId,
) -> Result<Url> {
    with_segments(
        &api.http_base(),
        &[
            "knowledge-bases",
            knowledge_base_id.as_str(),
            "v1",
            "chats",
            chat_id.as_str(),
        ],
    )
}

fn with_segments(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url =
        Url::parse(base).map_err(|e| ChatError::Transport(format!("invalid base url {base}: {e}")))?;
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|()| ChatError::Transport(format!("base url cannot carry a path: {base}")))?;
        let _ = path.pop_if_empty().extend(segments);
    }
    Ok(url)
}
