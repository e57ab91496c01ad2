//! Chat log entries and their wire shapes.
//!
//! A [`ChatMessage`] is created in one of three ways:
//!
//! - from the live stream ([`ServerMessage::into_chat_message`]); the
//!   dispatcher assigns its `index`
//! - from persisted history ([`ChatHistory::into_messages`]); `index` stays
//!   `None` and `stop_reason` is forced to [`COMPLETED_STOP_REASON`]
//! - locally, as a pending question ([`ChatMessage::pending`]) or a
//!   synthesized connection failure ([`ChatMessage::connection_error`])

use serde::{Deserialize, Serialize};

use crate::constants::{
    COMPLETED_STOP_REASON, GENERAL_ERROR_MESSAGE, INTERRUPTED_STOP_REASON, LOCAL_ERROR_STOP_REASON,
};
use crate::ids::ChatId;

/// Kind of BOT turn. Only affects styling downstream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    /// Regular answer.
    #[default]
    Answer,
    /// Application-level or locally synthesized error.
    Error,
}

/// A citation attached to an answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    /// Source file name.
    pub file_name: String,
    /// Quoted text from the file.
    pub text: String,
}

/// One inbound frame (or history entry) as the server sends it.
///
/// The server never sends `chatId` or `index`; both are attached locally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    /// Question this fragment answers.
    #[serde(default)]
    pub question: String,
    /// Answer text carried by this fragment.
    pub answer: String,
    /// Non-null on the terminal fragment of a turn.
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Answer or error.
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    /// Citations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_data: Option<Vec<FileData>>,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
    /// Author of the question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl ServerMessage {
    /// Attach the owning chat. `index` is left for the dispatcher.
    #[must_use]
    pub fn into_chat_message(self, chat_id: ChatId) -> ChatMessage {
        ChatMessage {
            chat_id,
            question: self.question,
            answer: self.answer,
            index: None,
            date: self.date,
            stop_reason: self.stop_reason,
            message_type: self.message_type,
            files_data: self.files_data,
            user_id: self.user_id,
        }
    }
}

/// An entry of the per-chat message log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Owning chat.
    pub chat_id: ChatId,
    /// Question text.
    pub question: String,
    /// Answer text (a fragment for live entries).
    pub answer: String,
    /// Order key; `None` for history-sourced entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
    /// Non-null once the turn is complete.
    pub stop_reason: Option<String>,
    /// Answer or error.
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    /// Citations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_data: Option<Vec<FileData>>,
    /// Author of the question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl ChatMessage {
    /// A locally created question shown before any server acknowledgment.
    #[must_use]
    pub fn pending(chat_id: ChatId, question: impl Into<String>, index: u64) -> Self {
        Self {
            chat_id,
            question: question.into(),
            answer: String::new(),
            index: Some(index),
            date: Some(now_millis()),
            stop_reason: None,
            message_type: MessageType::Answer,
            files_data: None,
            user_id: None,
        }
    }

    /// A terminal ERROR turn synthesized after the connection retry budget
    /// is exhausted. Never crosses the wire.
    #[must_use]
    pub fn connection_error(chat_id: ChatId, question: impl Into<String>) -> Self {
        Self {
            chat_id,
            question: question.into(),
            answer: GENERAL_ERROR_MESSAGE.to_owned(),
            index: None,
            date: Some(now_millis()),
            stop_reason: Some(LOCAL_ERROR_STOP_REASON.to_owned()),
            message_type: MessageType::Error,
            files_data: None,
            user_id: None,
        }
    }

    /// An empty terminal fragment that closes the turn `open` belongs to.
    ///
    /// Keeps the citations and type of the open turn so folding it in only
    /// flips the turn to finished.
    #[must_use]
    pub fn interrupted(open: &ChatMessage) -> Self {
        Self {
            chat_id: open.chat_id.clone(),
            question: open.question.clone(),
            answer: String::new(),
            index: None,
            date: Some(now_millis()),
            stop_reason: Some(INTERRUPTED_STOP_REASON.to_owned()),
            message_type: open.message_type,
            files_data: open.files_data.clone(),
            user_id: open.user_id.clone(),
        }
    }

    /// Whether this entry came from persisted history.
    #[must_use]
    pub fn is_history(&self) -> bool {
        self.index.is_none()
    }

    /// Whether this entry closes its turn.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.stop_reason.is_some()
    }
}

/// All persisted entries of one chat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistory {
    /// Chat the entries belong to.
    pub chat_id: ChatId,
    /// Entries in server order.
    #[serde(default)]
    pub entries: Vec<ServerMessage>,
}

impl ChatHistory {
    /// Convert entries into log-shaped messages: owning chat attached,
    /// no index, stop reason forced to the completed sentinel.
    #[must_use]
    pub fn into_messages(self) -> Vec<ChatMessage> {
        let chat_id = self.chat_id;
        self.entries
            .into_iter()
            .map(|entry| {
                let mut message = entry.into_chat_message(chat_id.clone());
                message.stop_reason = Some(COMPLETED_STOP_REASON.to_owned());
                message
            })
            .collect()
    }
}

/// Body of the history endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryResponse {
    /// One record per chat.
    #[serde(default)]
    pub history: Vec<ChatHistory>,
}

/// Current wall clock in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // -- local constructors --

    #[test]
    fn interrupted_closes_turn_and_keeps_citations() {
        let mut open = ChatMessage::pending(ChatId::from("c1"), "q", 3);
        open.answer = "partial".into();
        open.files_data = Some(vec![FileData {
            file_name: "a.pdf".into(),
            text: "t".into(),
        }]);
        let closing = ChatMessage::interrupted(&open);
        assert!(closing.is_terminal());
        assert!(closing.answer.is_empty());
        assert_eq!(closing.stop_reason.as_deref(), Some(INTERRUPTED_STOP_REASON));
        assert_eq!(closing.files_data, open.files_data);
        assert_eq!(closing.chat_id, open.chat_id);
    }

    // -- ServerMessage --

    #[test]
    fn parses_streamed_fragment() {
        let raw = r#"{"question":"how are you","answer":"I'm ","stopReason":null,"type":"ANSWER"}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.question, "how are you");
        assert_eq!(msg.answer, "I'm ");
        assert!(msg.stop_reason.is_none());
        assert_eq!(msg.message_type, MessageType::Answer);
    }

    #[test]
    fn parses_error_frame_with_citations() {
        let raw = r#"{
            "question": "q",
            "answer": "",
            "stopReason": "error",
            "type": "ERROR",
            "filesData": [{"fileName": "a.pdf", "text": "quote"}],
            "date": 1700000000000,
            "userId": "u1"
        }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.message_type, MessageType::Error);
        assert_eq!(msg.files_data.as_ref().unwrap()[0].file_name, "a.pdf");
        assert_eq!(msg.date, Some(1_700_000_000_000));
        assert_eq!(msg.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn missing_answer_is_rejected() {
        let raw = r#"{"question":"q","stopReason":null}"#;
        assert!(serde_json::from_str::<ServerMessage>(raw).is_err());
    }

    #[test]
    fn into_chat_message_has_no_index() {
        let msg = ServerMessage {
            question: "q".into(),
            answer: "a".into(),
            stop_reason: None,
            message_type: MessageType::Answer,
            files_data: None,
            date: None,
            user_id: None,
        };
        let chat = msg.into_chat_message(ChatId::from("c1"));
        assert_eq!(chat.chat_id.as_str(), "c1");
        assert!(chat.index.is_none());
    }

    // -- ChatHistory --

    #[test]
    fn history_entries_are_forced_complete() {
        let raw = r#"{"history":[{"chatId":"c1","entries":[
            {"question":"hi","answer":"hello","stopReason":null,"type":"ANSWER"}
        ]}]}"#;
        let body: HistoryResponse = serde_json::from_str(raw).unwrap();
        let messages = body.history.into_iter().next().unwrap().into_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].chat_id.as_str(), "c1");
        assert_eq!(messages[0].stop_reason.as_deref(), Some(COMPLETED_STOP_REASON));
        assert!(messages[0].is_history());
    }

    // -- ChatMessage constructors --

    #[test]
    fn pending_question_is_open() {
        let msg = ChatMessage::pending(ChatId::from("c1"), "hello?", 4);
        assert_eq!(msg.index, Some(4));
        assert!(msg.answer.is_empty());
        assert!(!msg.is_terminal());
    }

    #[test]
    fn connection_error_is_terminal_error() {
        let msg = ChatMessage::connection_error(ChatId::from("c1"), "q");
        assert_eq!(msg.message_type, MessageType::Error);
        assert!(msg.is_terminal());
        assert_eq!(msg.answer, GENERAL_ERROR_MESSAGE);
    }

    #[test]
    fn message_type_wire_names() {
        assert_eq!(serde_json::to_string(&MessageType::Answer).unwrap(), "\"ANSWER\"");
        assert_eq!(serde_json::to_string(&MessageType::Error).unwrap(), "\"ERROR\"");
    }
}
