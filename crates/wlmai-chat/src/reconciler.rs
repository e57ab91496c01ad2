//! Projection of history, live fragments and a pending question into the
//! display sequence of USER/BOT [`PromptItem`]s.
//!
//! Pure and deterministic: the same inputs always give the same output.
//!
//! Candidates for one chat are sorted by index (history has none and sorts
//! first; the sort is stable so history keeps server order). Each candidate
//! then either opens a new USER/BOT pair or, when it continues a BOT turn
//! that is still writing, is folded into that turn.

use std::collections::HashSet;

use wlmai_core::{ChatId, ChatMessage, PromptItem};

/// Build the display sequence for `chat_id`.
///
/// Entries of other chats in `history` or `live` are ignored. `pending` is
/// ignored once a live entry with the same or a later index exists.
pub fn reconcile(
    chat_id: &ChatId,
    history: &[ChatMessage],
    live: &[ChatMessage],
    pending: Option<&ChatMessage>,
) -> Vec<PromptItem> {
    let live_max = live
        .iter()
        .filter(|m| &m.chat_id == chat_id)
        .filter_map(|m| m.index)
        .max();
    let pending = pending.filter(|p| match (p.index, live_max) {
        (Some(pending_index), Some(max)) => pending_index > max,
        _ => true,
    });

    let mut candidates: Vec<&ChatMessage> = history
        .iter()
        .chain(live)
        .chain(pending)
        .filter(|m| &m.chat_id == chat_id)
        .collect();
    candidates.sort_by_key(|m| m.index);

    candidates
        .into_iter()
        .fold(Vec::new(), |mut prompts, message| {
            if is_continuation(&prompts, message) {
                if let Some(open) = prompts.last_mut() {
                    open.absorb(message);
                }
            } else {
                prompts.push(PromptItem::user_half(message));
                prompts.push(PromptItem::bot_half(message));
            }
            prompts
        })
}

/// Whether `candidate` continues the last BOT turn of `prompts`.
///
/// History entries always start a new turn; live entries continue only a
/// BOT turn that is still writing.
pub fn is_continuation(prompts: &[PromptItem], candidate: &ChatMessage) -> bool {
    if candidate.is_history() {
        return false;
    }
    prompts
        .last()
        .is_some_and(|last| last.is_bot() && last.is_writing)
}

/// Reconcile every chat that appears in `history` or `live`.
///
/// Chats are returned in first-seen order (history first).
pub fn group_by_chat(history: &[ChatMessage], live: &[ChatMessage]) -> Vec<(ChatId, Vec<PromptItem>)> {
    let mut seen = HashSet::new();
    history
        .iter()
        .chain(live)
        .filter(|m| seen.insert(m.chat_id.clone()))
        .map(|m| m.chat_id.clone())
        .collect::<Vec<_>>()
        .into_iter()
        .map(|chat_id| {
            let prompts = reconcile(&chat_id, history, live, None);
            (chat_id, prompts)
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use wlmai_core::constants::COMPLETED_STOP_REASON;
    use wlmai_core::{MessageType, UserType};

    use super::*;

    fn history(chat: &str, question: &str, answer: &str) -> ChatMessage {
        let mut m = ChatMessage::pending(ChatId::from(chat), question, 0);
        m.index = None;
        m.answer = answer.into();
        m.stop_reason = Some(COMPLETED_STOP_REASON.into());
        m
    }

    fn live(chat: &str, index: u64, answer: &str, stop: Option<&str>) -> ChatMessage {
        let mut m = ChatMessage::pending(ChatId::from(chat), "q", index);
        m.answer = answer.into();
        m.stop_reason = stop.map(str::to_owned);
        m
    }

    // -- basic shapes --

    #[test]
    fn empty_inputs_give_empty_sequence() {
        assert!(reconcile(&ChatId::from("c"), &[], &[], None).is_empty());
    }

    #[test]
    fn history_then_streamed_answer() {
        let c = ChatId::from("c");
        let hist = [history("c", "hi", "hello")];
        let frames = [
            live("c", 1, "I'm ", None),
            live("c", 2, "fine", None),
            live("c", 3, "", Some("end")),
        ];
        let prompts = reconcile(&c, &hist, &frames, None);

        assert_eq!(prompts.len(), 4);
        assert_eq!(prompts[0].user, UserType::User);
        assert_eq!(prompts[0].message, "hi");
        assert_eq!(prompts[1].message, "hello");
        assert!(!prompts[1].is_writing);
        assert_eq!(prompts[2].message, "q");
        assert_eq!(prompts[3].message, "I'm fine");
        assert!(!prompts[3].is_writing);
    }

    #[test]
    fn open_turn_is_writing() {
        let c = ChatId::from("c");
        let prompts = reconcile(&c, &[], &[live("c", 1, "par", None)], None);
        assert!(prompts[1].is_writing);
    }

    #[test]
    fn terminal_fragment_starts_next_turn() {
        let c = ChatId::from("c");
        let frames = [
            live("c", 1, "one", Some("end")),
            live("c", 2, "two", Some("end")),
        ];
        let prompts = reconcile(&c, &[], &frames, None);
        assert_eq!(prompts.len(), 4);
        assert_eq!(prompts[1].message, "one");
        assert_eq!(prompts[3].message, "two");
    }

    #[test]
    fn empty_fragment_then_empty_terminal() {
        let c = ChatId::from("c");
        let frames = [live("c", 1, "", None), live("c", 2, "", Some("end"))];
        let prompts = reconcile(&c, &[], &frames, None);
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[1].message, "");
        assert!(!prompts[1].is_writing);
    }

    #[test]
    fn history_never_continues() {
        let c = ChatId::from("c");
        let hist = [history("c", "a", "1"), history("c", "b", "2")];
        let prompts = reconcile(&c, &hist, &[], None);
        assert_eq!(prompts.len(), 4);
        assert_eq!(prompts[3].message, "2");
    }

    #[test]
    fn history_sorts_before_live_regardless_of_input_order() {
        let c = ChatId::from("c");
        let frames = [live("c", 1, "new", Some("end"))];
        let hist = [history("c", "old", "old answer")];
        let prompts = reconcile(&c, &hist, &frames, None);
        assert_eq!(prompts[1].message, "old answer");
        assert_eq!(prompts[3].message, "new");
    }

    #[test]
    fn other_chats_are_ignored() {
        let c = ChatId::from("c");
        let frames = [live("other", 1, "x", None), live("c", 1, "y", Some("end"))];
        let prompts = reconcile(&c, &[history("other", "q", "a")], &frames, None);
        assert_eq!(prompts.len(), 2);
        assert!(prompts.iter().all(|p| p.chat_id == c));
    }

    #[test]
    fn error_fragment_sets_type() {
        let c = ChatId::from("c");
        let mut err = live("c", 2, "boom", Some("error"));
        err.message_type = MessageType::Error;
        let prompts = reconcile(&c, &[], &[live("c", 1, "par", None), err], None);
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[1].message, "parboom");
        assert_eq!(prompts[1].message_type, MessageType::Error);
    }

    // -- pending --

    #[test]
    fn pending_shows_open_pair() {
        let c = ChatId::from("c");
        let pending = ChatMessage::pending(c.clone(), "why?", 1);
        let prompts = reconcile(&c, &[], &[], Some(&pending));
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0].message, "why?");
        assert_eq!(prompts[1].message, "");
        assert!(prompts[1].is_writing);
    }

    #[test]
    fn pending_is_superseded_by_first_fragment() {
        let c = ChatId::from("c");
        let pending = ChatMessage::pending(c.clone(), "q", 1);
        let frames = [live("c", 1, "ans", None)];
        let prompts = reconcile(&c, &[], &frames, Some(&pending));
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[1].message, "ans");
    }

    #[test]
    fn pending_after_completed_turns() {
        let c = ChatId::from("c");
        let frames = [live("c", 1, "a", Some("end"))];
        let pending = ChatMessage::pending(c.clone(), "next", 2);
        let prompts = reconcile(&c, &[history("c", "h", "h")], &frames, Some(&pending));
        assert_eq!(prompts.len(), 6);
        assert_eq!(prompts[4].message, "next");
        assert!(prompts[5].is_writing);
    }

    // -- grouping --

    #[test]
    fn group_by_chat_first_seen_order() {
        let hist = [history("b", "q", "a"), history("a", "q", "a")];
        let frames = [live("c", 1, "x", Some("end"))];
        let groups = group_by_chat(&hist, &frames);
        let ids: Vec<_> = groups.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c"]);
        assert!(groups.iter().all(|(_, prompts)| prompts.len() == 2));
    }

    // -- properties --

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        fn fragments() -> impl Strategy<Value = Vec<String>> {
            prop::collection::vec("[a-z ]{0,6}", 1..12)
        }

        proptest! {
            #[test]
            fn fragments_concatenate_in_order(parts in fragments()) {
                let c = ChatId::from("c");
                let last = parts.len() - 1;
                let frames: Vec<_> = parts
                    .iter()
                    .enumerate()
                    .map(|(i, p)| live("c", i as u64 + 1, p, (i == last).then_some("end")))
                    .collect();
                let prompts = reconcile(&c, &[], &frames, None);
                prop_assert_eq!(prompts.len(), 2);
                prop_assert_eq!(&prompts[1].message, &parts.concat());
                prop_assert!(!prompts[1].is_writing);
            }

            #[test]
            fn output_is_independent_of_live_input_order(
                parts in fragments(),
                seed in any::<u64>(),
            ) {
                let c = ChatId::from("c");
                let frames: Vec<_> = parts
                    .iter()
                    .enumerate()
                    .map(|(i, p)| live("c", i as u64 + 1, p, None))
                    .collect();
                let mut shuffled = frames.clone();
                let len = shuffled.len();
                shuffled.rotate_left((seed as usize) % len);
                prop_assert_eq!(
                    reconcile(&c, &[], &frames, None),
                    reconcile(&c, &[], &shuffled, None)
                );
            }

            #[test]
            fn never_mixes_chats(
                a in fragments(),
                b in fragments(),
            ) {
                let mut frames = Vec::new();
                for (i, p) in a.iter().enumerate() {
                    frames.push(live("a", i as u64 + 1, p, None));
                }
                for (i, p) in b.iter().enumerate() {
                    frames.push(live("b", i as u64 + 1, p, None));
                }
                let prompts_a = reconcile(&ChatId::from("a"), &[], &frames, None);
                let prompts_b = reconcile(&ChatId::from("b"), &[], &frames, None);
                prop_assert!(prompts_a.iter().all(|p| p.chat_id.as_str() == "a"));
                prop_assert!(prompts_b.iter().all(|p| p.chat_id.as_str() == "b"));
                prop_assert_eq!(&prompts_a[1].message, &a.concat());
                prop_assert_eq!(&prompts_b[1].message, &b.concat());
            }

            #[test]
            fn pairs_alternate_user_bot(
                stops in prop::collection::vec(any::<bool>(), 1..16),
            ) {
                let c = ChatId::from("c");
                let frames: Vec<_> = stops
                    .iter()
                    .enumerate()
                    .map(|(i, stop)| live("c", i as u64 + 1, "x", stop.then_some("end")))
                    .collect();
                let prompts = reconcile(&c, &[], &frames, None);
                prop_assert_eq!(prompts.len() % 2, 0);
                for pair in prompts.chunks(2) {
                    prop_assert_eq!(pair[0].user, UserType::User);
                    prop_assert_eq!(pair[1].user, UserType::Bot);
                }
            }
        }
    }
}
