//! Live message log.
//!
//! Inbound frames are decoded, tagged with the owning chat, stamped with a
//! strictly increasing per-chat index and appended. Subscribers get one
//! [`LogUpdate`] per append, in append order, exactly once.
//!
//! Frames are tagged with the connection generation that read them; frames
//! from a generation other than the accepted one are dropped, so a reader
//! that outlives its connection can never write into the log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use wlmai_core::{ChatError, ChatId, ChatMessage, Result, ServerMessage, now_millis};

/// Notification that `index` was appended to `chat_id`'s log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogUpdate {
    /// Chat the entry belongs to.
    pub chat_id: ChatId,
    /// Index assigned to the entry.
    pub index: u64,
}

/// Receiving side of a log subscription.
pub type LogUpdates = mpsc::UnboundedReceiver<LogUpdate>;

#[derive(Default)]
struct ChatLog {
    entries: Vec<ChatMessage>,
    last_index: u64,
    /// Question sent on the stream whose first fragment has not arrived.
    awaiting: Option<ChatMessage>,
}

impl ChatLog {
    /// The awaited question, unless an entry at or past its index landed.
    fn take_awaiting(&mut self) -> Option<ChatMessage> {
        let last_index = self.last_index;
        self.awaiting
            .take()
            .filter(|question| question.index.is_some_and(|index| index > last_index))
    }
}

/// Append-only per-chat log of live entries.
#[derive(Default)]
pub struct MessageDispatcher {
    chats: RwLock<HashMap<ChatId, ChatLog>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<LogUpdate>>>,
    accepted_generation: AtomicU64,
}

impl MessageDispatcher {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one raw frame read by connection `generation` and append it
    /// to `chat_id`'s log.
    ///
    /// Returns the assigned index, or `None` when the frame was stale or
    /// malformed (both are logged and dropped).
    pub fn dispatch_frame(&self, chat_id: &ChatId, generation: u64, raw: &str) -> Option<u64> {
        let accepted = self.accepted_generation.load(Ordering::Acquire);
        if generation != accepted {
            debug!(%chat_id, generation, accepted, "dropping frame from stale connection");
            return None;
        }
        match decode_frame(raw) {
            Ok(frame) => Some(self.append(frame.into_chat_message(chat_id.clone()))),
            Err(e) => {
                warn!(%chat_id, generation, error = %e, len = raw.len(), "dropping frame");
                None
            }
        }
    }

    /// Append an entry, assigning the next index of its chat.
    ///
    /// Entries without a date get the arrival time.
    pub fn append(&self, mut message: ChatMessage) -> u64 {
        if message.date.is_none() {
            message.date = Some(now_millis());
        }

        let mut chats = self.chats.write();
        let log = chats.entry(message.chat_id.clone()).or_default();
        log.last_index += 1;
        let index = log.last_index;
        message.index = Some(index);

        let update = LogUpdate {
            chat_id: message.chat_id.clone(),
            index,
        };
        trace!(chat_id = %update.chat_id, index, terminal = message.is_terminal(), "log append");
        log.entries.push(message);

        // Published under the log lock so concurrent appends reach every
        // subscriber in index order.
        self.publish(&update);
        index
    }

    /// Remember that `question` went out and no answer fragment for it has
    /// been logged yet.
    ///
    /// `question` carries its chat and the index its answer is expected at.
    pub fn await_answer(&self, question: ChatMessage) {
        let mut chats = self.chats.write();
        let log = chats.entry(question.chat_id.clone()).or_default();
        log.awaiting = Some(question);
    }

    /// Forget the awaited question of `chat_id`.
    pub fn cancel_awaited(&self, chat_id: &ChatId) {
        if let Some(log) = self.chats.write().get_mut(chat_id) {
            log.awaiting = None;
        }
    }

    /// Close the open turn of `chat_id`.
    ///
    /// The turn is open if its last entry is non-terminal, or if a question
    /// is awaited that no fragment has answered yet. Returns the index of
    /// the closing entry.
    pub fn finalize_open_turn(&self, chat_id: &ChatId) -> Option<u64> {
        let closing = {
            let mut chats = self.chats.write();
            let log = chats.get_mut(chat_id)?;
            let awaited = log.take_awaiting();
            match (log.entries.last(), awaited) {
                (Some(last), _) if !last.is_terminal() => ChatMessage::interrupted(last),
                (_, Some(question)) => ChatMessage::interrupted(&question),
                _ => return None,
            }
        };
        debug!(%chat_id, "closing interrupted turn");
        Some(self.append(closing))
    }

    /// All live entries of `chat_id`, in index order.
    pub fn snapshot(&self, chat_id: &ChatId) -> Vec<ChatMessage> {
        self.chats
            .read()
            .get(chat_id)
            .map(|log| log.entries.clone())
            .unwrap_or_default()
    }

    /// Highest index assigned in `chat_id` (0 if none yet).
    pub fn last_index(&self, chat_id: &ChatId) -> u64 {
        self.chats.read().get(chat_id).map_or(0, |log| log.last_index)
    }

    /// Whether the last live entry of `chat_id` is still streaming.
    pub fn has_open_turn(&self, chat_id: &ChatId) -> bool {
        self.chats
            .read()
            .get(chat_id)
            .and_then(|log| log.entries.last())
            .is_some_and(|last| !last.is_terminal())
    }

    /// Drop the live entries of `chat_id`.
    ///
    /// The index counter is kept so indices are never reused.
    pub fn reset_chat(&self, chat_id: &ChatId) {
        if let Some(log) = self.chats.write().get_mut(chat_id) {
            debug!(%chat_id, dropped = log.entries.len(), "resetting live log");
            log.entries.clear();
            log.awaiting = None;
        }
    }

    /// Subscribe to appends made after this call.
    pub fn subscribe(&self) -> LogUpdates {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Accept frames only from connection `generation` from now on.
    pub fn set_generation(&self, generation: u64) {
        self.accepted_generation.store(generation, Ordering::Release);
    }

    /// Whether frames from `generation` are currently accepted.
    pub fn accepts_generation(&self, generation: u64) -> bool {
        self.accepted_generation.load(Ordering::Acquire) == generation
    }

    fn publish(&self, update: &LogUpdate) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(update.clone()).is_ok());
    }
}

/// Parse one inbound text frame.
pub fn decode_frame(raw: &str) -> Result<ServerMessage> {
    serde_json::from_str(raw).map_err(|e| ChatError::MalformedFrame(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
