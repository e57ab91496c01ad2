//! Display-facing projection of the chat log.

use serde::{Deserialize, Serialize};

use crate::ids::ChatId;
use crate::messages::{ChatMessage, FileData, MessageType};

/// Which side of the conversation an item belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserType {
    /// The question author.
    User,
    /// The assistant.
    Bot,
}

/// One rendered half of a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptItem {
    /// Owning chat.
    pub chat_id: ChatId,
    /// USER or BOT.
    pub user: UserType,
    /// Question of the turn (same on both halves).
    pub question: String,
    /// Display text: the question for USER, the accumulated answer for BOT.
    pub message: String,
    /// Epoch milliseconds of the latest contributing entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
    /// BOT only: the answer is still streaming.
    pub is_writing: bool,
    /// Citations of the latest contributing fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_data: Option<Vec<FileData>>,
    /// Answer or error.
    #[serde(rename = "type")]
    pub message_type: MessageType,
}

impl PromptItem {
    /// USER half of the turn opened by `message`.
    #[must_use]
    pub fn user_half(message: &ChatMessage) -> Self {
        Self {
            chat_id: message.chat_id.clone(),
            user: UserType::User,
            question: message.question.clone(),
            message: message.question.clone(),
            date: message.date,
            is_writing: false,
            files_data: None,
            message_type: message.message_type,
        }
    }

    /// BOT half of the turn opened by `message`.
    #[must_use]
    pub fn bot_half(message: &ChatMessage) -> Self {
        Self {
            chat_id: message.chat_id.clone(),
            user: UserType::Bot,
            question: message.question.clone(),
            message: message.answer.clone(),
            date: message.date,
            is_writing: message.stop_reason.is_none(),
            files_data: message.files_data.clone(),
            message_type: message.message_type,
        }
    }

    /// Fold a continuation fragment into this BOT item.
    ///
    /// Text is always appended, never replaced.
    pub fn absorb(&mut self, fragment: &ChatMessage) {
        self.message.push_str(&fragment.answer);
        self.date = fragment.date;
        self.files_data.clone_from(&fragment.files_data);
        self.message_type = fragment.message_type;
        self.is_writing = fragment.stop_reason.is_none();
    }

    /// Whether this is the assistant half.
    #[must_use]
    pub fn is_bot(&self) -> bool {
        self.user == UserType::Bot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(answer: &str, stop: Option<&str>) -> ChatMessage {
        let mut msg = ChatMessage::pending(ChatId::from("c1"), "q", 1);
        msg.answer = answer.into();
        msg.stop_reason = stop.map(str::to_owned);
        msg
    }

    #[test]
    fn halves_share_question() {
        let msg = fragment("a", None);
        let user = PromptItem::user_half(&msg);
        let bot = PromptItem::bot_half(&msg);
        assert_eq!(user.message, "q");
        assert!(!user.is_writing);
        assert_eq!(bot.message, "a");
        assert!(bot.is_writing);
        assert_eq!(user.question, bot.question);
    }

    #[test]
    fn absorb_appends_and_closes() {
        let mut bot = PromptItem::bot_half(&fragment("I'm ", None));
        bot.absorb(&fragment("fine", Some("done")));
        assert_eq!(bot.message, "I'm fine");
        assert!(!bot.is_writing);
    }

    #[test]
    fn user_type_wire_names() {
        assert_eq!(serde_json::to_string(&UserType::Bot).unwrap(), "\"BOT\"");
    }
}
