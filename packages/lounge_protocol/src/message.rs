//! Chat data model: messages, code snippets, AI conversations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time as epoch milliseconds — the timestamp unit used on the wire
/// and in every local log.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A code snippet attached to a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSnippet {
    pub language: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// One unit of room-scoped communication.
///
/// The id is client-generated on send; the relay preserves it (stamping one
/// only when the client sent none) so receivers can deduplicate the echo of
/// an optimistic insert against the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    /// Display identity of the author (no authentication — see non-goals).
    pub user: String,
    pub text: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_ai_message: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_system_message: bool,
    /// Local-only flag: true on the sender's optimistic copy. The relay
    /// clears it before fan-out.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_own_message: bool,
    pub room_id: String,
    /// Ordered emoji tokens; duplicates permitted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_snippets: Vec<CodeSnippet>,
    /// Parent message id when this message is a threaded reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "u32_is_zero")]
    pub reply_count: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub edited: bool,
}

fn u32_is_zero(n: &u32) -> bool {
    *n == 0
}

impl ChatMessage {
    /// A user-authored message with a fresh id and the current timestamp.
    pub fn user_message(
        user: impl Into<String>,
        text: impl Into<String>,
        room_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user: user.into(),
            text: text.into(),
            timestamp: now_millis(),
            is_ai_message: false,
            is_system_message: false,
            is_own_message: false,
            room_id: room_id.into(),
            reactions: Vec::new(),
            code_snippets: Vec::new(),
            parent_id: None,
            reply_count: 0,
            edited: false,
        }
    }

    /// A system notification (connection status, join/leave, errors).
    pub fn system(text: impl Into<String>, room_id: impl Into<String>) -> Self {
        let mut msg = Self::user_message("system", text, room_id);
        msg.is_system_message = true;
        msg
    }

    /// An AI-relayed message (Q&A summaries surfaced into the chat log).
    pub fn ai(user: impl Into<String>, text: impl Into<String>, room_id: impl Into<String>) -> Self {
        let mut msg = Self::user_message(user, text, room_id);
        msg.is_ai_message = true;
        msg
    }
}

/// A question/answer pair scoped to a repository.
///
/// Created loading with a null answer; transitions exactly once to either
/// answered or errored and never again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConversation {
    pub id: String,
    pub question: String,
    /// Null until the upstream call resolves.
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub is_loading: bool,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Display identity of the asking user.
    pub user: String,
    pub repo_full_name: String,
}

impl AiConversation {
    /// A freshly asked question: loading, no answer, no error.
    pub fn pending(
        question: impl Into<String>,
        user: impl Into<String>,
        repo_full_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            question: question.into(),
            answer: None,
            error: None,
            is_loading: true,
            timestamp: now_millis(),
            user: user.into(),
            repo_full_name: repo_full_name.into(),
        }
    }

    /// Terminal transition: the upstream answered.
    pub fn resolve(&mut self, answer: impl Into<String>) {
        self.answer = Some(answer.into());
        self.error = None;
        self.is_loading = false;
    }

    /// Terminal transition: the upstream failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.answer = None;
        self.error = Some(error.into());
        self.is_loading = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_minimal_json_fills_defaults() {
        let json = r#"{"id":"m1","user":"alice","text":"hi","timestamp":1700000000000,"roomId":"acme/widgets"}"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.room_id, "acme/widgets");
        assert!(!msg.is_own_message);
        assert!(!msg.is_system_message);
        assert!(msg.reactions.is_empty());
        assert!(msg.parent_id.is_none());
        assert_eq!(msg.reply_count, 0);
        assert!(!msg.edited);
    }

    #[test]
    fn chat_message_skips_default_fields_on_serialize() {
        let msg = ChatMessage::user_message("alice", "hi", "acme/widgets");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"roomId\":\"acme/widgets\""));
        assert!(!json.contains("isOwnMessage"));
        assert!(!json.contains("reactions"));
        assert!(!json.contains("replyCount"));
        assert!(!json.contains("parentId"));
    }

    #[test]
    fn chat_message_roundtrip_with_all_fields() {
        let mut msg = ChatMessage::user_message("bob", "look at this", "acme/widgets");
        msg.is_own_message = true;
        msg.reactions = vec!["👍".to_string(), "👍".to_string(), "🚀".to_string()];
        msg.code_snippets = vec![CodeSnippet {
            language: "rust".to_string(),
            code: "fn main() {}".to_string(),
            filename: Some("main.rs".to_string()),
        }];
        msg.parent_id = Some("m0".to_string());
        msg.reply_count = 2;
        msg.edited = true;

        let json = serde_json::to_string(&msg).unwrap();
        let decoded: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn system_message_flags() {
        let msg = ChatMessage::system("Disconnected from chat server.", "acme/widgets");
        assert!(msg.is_system_message);
        assert!(!msg.is_ai_message);
        assert_eq!(msg.user, "system");
    }

    #[test]
    fn conversation_answer_is_null_while_loading() {
        let conv = AiConversation::pending("What does this repo do?", "alice", "acme/widgets");
        let json = serde_json::to_value(&conv).unwrap();
        assert!(json["answer"].is_null());
        assert_eq!(json["isLoading"], true);
        // error: None is skipped entirely, not serialized as null
        assert!(json.get("error").is_none());
    }

    #[test]
    fn conversation_resolve_is_terminal_shape() {
        let mut conv = AiConversation::pending("q", "alice", "acme/widgets");
        conv.resolve("it renders widgets");
        assert_eq!(conv.answer.as_deref(), Some("it renders widgets"));
        assert!(conv.error.is_none());
        assert!(!conv.is_loading);
    }

    #[test]
    fn conversation_fail_clears_answer() {
        let mut conv = AiConversation::pending("q", "alice", "acme/widgets");
        conv.fail("quota exceeded");
        assert!(conv.answer.is_none());
        assert_eq!(conv.error.as_deref(), Some("quota exceeded"));
        assert!(!conv.is_loading);
    }

    #[test]
    fn conversation_roundtrip() {
        let mut conv = AiConversation::pending("q", "alice", "acme/widgets");
        conv.resolve("a");
        let json = serde_json::to_string(&conv).unwrap();
        let decoded: AiConversation = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, conv);
    }

    #[test]
    fn user_messages_get_distinct_ids() {
        let a = ChatMessage::user_message("alice", "one", "r");
        let b = ChatMessage::user_message("alice", "one", "r");
        assert_ne!(a.id, b.id);
    }
}
