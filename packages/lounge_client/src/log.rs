//! Local log for the active room
//!
//! The session manager's exclusively-owned state: an ordered message log,
//! the room's shared AI conversations, and a bounded seen-id set used to
//! deduplicate relay echoes of optimistic inserts. Switching rooms drops
//! the whole structure.

use std::collections::{HashSet, VecDeque};

use lounge_protocol::{AiConversation, ChatMessage, CodeSnippet};

/// Seen-id entries kept before the oldest are evicted. Bounds memory for
/// long-lived rooms; an echo arriving after a thousand newer messages is
/// not worth defending against.
const SEEN_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
pub struct RoomLog {
    messages: Vec<ChatMessage>,
    conversations: Vec<AiConversation>,
    seen_ids: HashSet<String>,
    seen_order: VecDeque<String>,
}

impl RoomLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn conversations(&self) -> &[AiConversation] {
        &self.conversations
    }

    /// Append a message. The caller decides whether to mark it seen;
    /// system messages are never deduplicated.
    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn is_seen(&self, id: &str) -> bool {
        self.seen_ids.contains(id)
    }

    /// Record a message id, evicting the oldest entries beyond capacity.
    pub fn mark_seen(&mut self, id: String) {
        if !self.seen_ids.insert(id.clone()) {
            return;
        }
        self.seen_order.push_back(id);
        while self.seen_order.len() > SEEN_CAPACITY {
            if let Some(evicted) = self.seen_order.pop_front() {
                self.seen_ids.remove(&evicted);
            }
        }
    }

    /// Append one reaction token. Duplicates are permitted.
    pub fn add_reaction(&mut self, message_id: &str, reaction: &str) -> Option<&ChatMessage> {
        let message = self.find_mut(message_id)?;
        message.reactions.push(reaction.to_string());
        Some(message)
    }

    /// Remove the most recent occurrence of a reaction token, so an
    /// add-then-remove round-trips to the prior state.
    pub fn remove_reaction(&mut self, message_id: &str, reaction: &str) -> Option<&ChatMessage> {
        let message = self.find_mut(message_id)?;
        if let Some(pos) = message.reactions.iter().rposition(|r| r == reaction) {
            message.reactions.remove(pos);
        }
        Some(message)
    }

    pub fn add_snippet(
        &mut self,
        message_id: &str,
        snippet: CodeSnippet,
    ) -> Option<&ChatMessage> {
        let message = self.find_mut(message_id)?;
        message.code_snippets.push(snippet);
        Some(message)
    }

    pub fn apply_edit(&mut self, message_id: &str, new_text: &str) -> Option<&ChatMessage> {
        let message = self.find_mut(message_id)?;
        message.text = new_text.to_string();
        message.edited = true;
        Some(message)
    }

    pub fn increment_reply_count(&mut self, message_id: &str) -> Option<&ChatMessage> {
        let message = self.find_mut(message_id)?;
        message.reply_count += 1;
        Some(message)
    }

    /// Merge a shared conversation: update in place when the id is already
    /// present (duplicate delivery), otherwise prepend (newest first, the
    /// order the Q&A panel renders). Returns true when updated in place.
    pub fn upsert_conversation(&mut self, conversation: AiConversation) -> bool {
        match self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            Some(existing) => {
                *existing = conversation;
                true
            }
            None => {
                self.conversations.insert(0, conversation);
                false
            }
        }
    }

    pub fn find_conversation(&self, id: &str) -> Option<&AiConversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn find_conversation_mut(&mut self, id: &str) -> Option<&mut AiConversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    fn find_mut(&mut self, message_id: &str) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, text: &str) -> ChatMessage {
        let mut m = ChatMessage::user_message("alice", text, "acme/widgets");
        m.id = id.to_string();
        m
    }

    #[test]
    fn optimistic_insert_then_echo_dedupes_by_id() {
        let mut log = RoomLog::new();
        let mut own = msg("m1", "hello");
        own.is_own_message = true;
        log.mark_seen(own.id.clone());
        log.append(own);

        // The relay's echo carries the same id.
        assert!(log.is_seen("m1"));
        assert_eq!(log.messages().len(), 1);
        assert!(log.messages()[0].is_own_message);
    }

    #[test]
    fn reaction_add_then_remove_round_trips() {
        let mut log = RoomLog::new();
        log.append(msg("m1", "hello"));
        log.add_reaction("m1", "🎉");

        let before = log.messages()[0].reactions.clone();
        log.add_reaction("m1", "👍");
        log.remove_reaction("m1", "👍");
        assert_eq!(log.messages()[0].reactions, before);
    }

    #[test]
    fn duplicate_reactions_are_kept_and_removed_one_at_a_time() {
        let mut log = RoomLog::new();
        log.append(msg("m1", "hello"));
        log.add_reaction("m1", "👍");
        log.add_reaction("m1", "👍");
        assert_eq!(log.messages()[0].reactions.len(), 2);

        log.remove_reaction("m1", "👍");
        assert_eq!(log.messages()[0].reactions, vec!["👍"]);
    }

    #[test]
    fn remove_unknown_reaction_is_noop() {
        let mut log = RoomLog::new();
        log.append(msg("m1", "hello"));
        log.add_reaction("m1", "🎉");
        log.remove_reaction("m1", "🚀");
        assert_eq!(log.messages()[0].reactions, vec!["🎉"]);
    }

    #[test]
    fn mutations_on_unknown_message_return_none() {
        let mut log = RoomLog::new();
        assert!(log.add_reaction("ghost", "🎉").is_none());
        assert!(log.apply_edit("ghost", "x").is_none());
        assert!(log.add_snippet(
            "ghost",
            CodeSnippet {
                language: "rust".into(),
                code: "1".into(),
                filename: None,
            }
        )
        .is_none());
    }

    #[test]
    fn edit_sets_text_and_flag() {
        let mut log = RoomLog::new();
        log.append(msg("m1", "helo"));
        let updated = log.apply_edit("m1", "hello").unwrap();
        assert_eq!(updated.text, "hello");
        assert!(updated.edited);
    }

    #[test]
    fn reply_count_accumulates() {
        let mut log = RoomLog::new();
        log.append(msg("m1", "parent"));
        log.increment_reply_count("m1");
        log.increment_reply_count("m1");
        assert_eq!(log.messages()[0].reply_count, 2);
    }

    #[test]
    fn conversation_upsert_merges_by_id() {
        let mut log = RoomLog::new();
        let mut conv = AiConversation::pending("q", "alice", "acme/widgets");
        conv.id = "c1".to_string();
        assert!(!log.upsert_conversation(conv.clone()));
        assert_eq!(log.conversations().len(), 1);
        assert!(log.conversations()[0].is_loading);

        // Duplicate delivery of the resolved copy updates in place.
        conv.resolve("an answer");
        assert!(log.upsert_conversation(conv));
        assert_eq!(log.conversations().len(), 1);
        assert_eq!(log.conversations()[0].answer.as_deref(), Some("an answer"));
    }

    #[test]
    fn conversations_prepend_newest_first() {
        let mut log = RoomLog::new();
        let mut first = AiConversation::pending("first", "alice", "r");
        first.id = "c1".into();
        let mut second = AiConversation::pending("second", "alice", "r");
        second.id = "c2".into();
        log.upsert_conversation(first);
        log.upsert_conversation(second);
        assert_eq!(log.conversations()[0].question, "second");
    }

    #[test]
    fn seen_set_is_bounded() {
        let mut log = RoomLog::new();
        for i in 0..(SEEN_CAPACITY + 10) {
            log.mark_seen(format!("m{i}"));
        }
        assert!(!log.is_seen("m0"));
        assert!(log.is_seen(&format!("m{}", SEEN_CAPACITY + 9)));
        assert_eq!(log.seen_ids.len(), SEEN_CAPACITY);
        assert_eq!(log.seen_order.len(), SEEN_CAPACITY);
    }

    #[test]
    fn marking_seen_twice_does_not_duplicate_order_entries() {
        let mut log = RoomLog::new();
        log.mark_seen("m1".to_string());
        log.mark_seen("m1".to_string());
        assert_eq!(log.seen_order.len(), 1);
    }
}
