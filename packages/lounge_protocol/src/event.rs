//! Event vocabulary exchanged over the WebSocket channel.
//!
//! Both enums are internally tagged; unknown tags and missing fields fail
//! deserialization, and the relay answers a failed parse with
//! `ServerEvent::Error` instead of passing the payload through.

use serde::{Deserialize, Serialize};

use crate::message::{AiConversation, ChatMessage, CodeSnippet};

/// Events sent FROM the client TO the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Enter a room. The relay enforces at-most-one-room: joining while a
    /// member elsewhere performs an implicit leave of the old room.
    JoinRoom { room_id: String },
    /// Leave a room. No-op if not a member.
    LeaveRoom { room_id: String },
    /// Send a chat message to the sender's current room. Threaded replies
    /// are ordinary messages with `parent_id` set.
    Chat { message: ChatMessage },
    /// Share a completed Q&A pair with the sender's current room.
    AiShared { conversation: AiConversation },
    /// Sender started typing.
    TypingStart,
    /// Sender stopped typing.
    TypingStop,
    /// Append a reaction token to a message.
    AddReaction { message_id: String, reaction: String },
    /// Remove one occurrence of a reaction token from a message.
    RemoveReaction { message_id: String, reaction: String },
    /// Attach a code snippet to a message.
    AddCodeSnippet {
        message_id: String,
        snippet: CodeSnippet,
    },
    /// Replace a message's text.
    EditMessage { message_id: String, new_text: String },
}

/// Events sent FROM the relay TO clients.
///
/// Every room-scoped event carries its `room_id` so receivers can drop
/// events that do not match their active room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// First frame after accept: tells the client its connection id so it
    /// can attribute membership and typing events to itself.
    ConnectionEstablished { connection_id: String },
    /// A chat message fanned out to the room (senders receive their own
    /// echo and deduplicate by message id).
    Chat { message: ChatMessage },
    /// A shared Q&A pair; receivers merge by conversation id.
    AiShared { conversation: AiConversation },
    MemberJoined {
        connection_id: String,
        room_id: String,
    },
    MemberLeft {
        connection_id: String,
        room_id: String,
    },
    TypingStarted {
        connection_id: String,
        room_id: String,
    },
    TypingStopped {
        connection_id: String,
        room_id: String,
    },
    ReactionAdded {
        message_id: String,
        reaction: String,
        user_id: String,
        room_id: String,
    },
    ReactionRemoved {
        message_id: String,
        reaction: String,
        user_id: String,
        room_id: String,
    },
    CodeSnippetAdded {
        message_id: String,
        snippet: CodeSnippet,
        user_id: String,
        room_id: String,
    },
    MessageEdited {
        message_id: String,
        new_text: String,
        /// Epoch milliseconds, stamped by the relay.
        edited_at: i64,
        room_id: String,
    },
    /// Addressed to a single connection, never broadcast.
    Error { message: String },
}

impl ServerEvent {
    /// The room this event is scoped to, if any.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            ServerEvent::Chat { message } => Some(&message.room_id),
            ServerEvent::AiShared { conversation } => Some(&conversation.repo_full_name),
            ServerEvent::MemberJoined { room_id, .. }
            | ServerEvent::MemberLeft { room_id, .. }
            | ServerEvent::TypingStarted { room_id, .. }
            | ServerEvent::TypingStopped { room_id, .. }
            | ServerEvent::ReactionAdded { room_id, .. }
            | ServerEvent::ReactionRemoved { room_id, .. }
            | ServerEvent::CodeSnippetAdded { room_id, .. }
            | ServerEvent::MessageEdited { room_id, .. } => Some(room_id),
            ServerEvent::ConnectionEstablished { .. } | ServerEvent::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_join_room_from_raw_json() {
        let json = r#"{"type":"JoinRoom","room_id":"acme/widgets"}"#;
        let ev: ClientEvent = serde_json::from_str(json).unwrap();
        match ev {
            ClientEvent::JoinRoom { room_id } => assert_eq!(room_id, "acme/widgets"),
            _ => panic!("Expected JoinRoom"),
        }
    }

    #[test]
    fn client_event_typing_has_no_payload() {
        let json = r#"{"type":"TypingStart"}"#;
        let ev: ClientEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(ev, ClientEvent::TypingStart));
    }

    #[test]
    fn client_event_chat_roundtrip() {
        let original = ClientEvent::Chat {
            message: ChatMessage::user_message("alice", "hello", "acme/widgets"),
        };
        let json = serde_json::to_string(&original).unwrap();
        let decoded: ClientEvent = serde_json::from_str(&json).unwrap();
        match decoded {
            ClientEvent::Chat { message } => {
                assert_eq!(message.text, "hello");
                assert_eq!(message.room_id, "acme/widgets");
            }
            _ => panic!("Expected Chat"),
        }
    }

    #[test]
    fn client_event_add_reaction_roundtrip() {
        let original = ClientEvent::AddReaction {
            message_id: "m1".to_string(),
            reaction: "🎉".to_string(),
        };
        let json = serde_json::to_string(&original).unwrap();
        let decoded: ClientEvent = serde_json::from_str(&json).unwrap();
        match decoded {
            ClientEvent::AddReaction {
                message_id,
                reaction,
            } => {
                assert_eq!(message_id, "m1");
                assert_eq!(reaction, "🎉");
            }
            _ => panic!("Expected AddReaction"),
        }
    }

    #[test]
    fn client_event_unknown_tag_rejected() {
        let json = r#"{"type":"AnalyzeEverything","room_id":"x"}"#;
        let result: Result<ClientEvent, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn client_event_missing_field_rejected() {
        let json = r#"{"type":"EditMessage","message_id":"m1"}"#;
        let result: Result<ClientEvent, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn server_event_member_joined_serialization() {
        let ev = ServerEvent::MemberJoined {
            connection_id: "conn-1".to_string(),
            room_id: "acme/widgets".to_string(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("MemberJoined"));
        assert!(json.contains("conn-1"));
        assert!(json.contains("acme/widgets"));
    }

    #[test]
    fn server_event_message_edited_roundtrip() {
        let original = ServerEvent::MessageEdited {
            message_id: "m1".to_string(),
            new_text: "fixed".to_string(),
            edited_at: 1700000000123,
            room_id: "acme/widgets".to_string(),
        };
        let json = serde_json::to_string(&original).unwrap();
        let decoded: ServerEvent = serde_json::from_str(&json).unwrap();
        match decoded {
            ServerEvent::MessageEdited {
                message_id,
                new_text,
                edited_at,
                room_id,
            } => {
                assert_eq!(message_id, "m1");
                assert_eq!(new_text, "fixed");
                assert_eq!(edited_at, 1700000000123);
                assert_eq!(room_id, "acme/widgets");
            }
            _ => panic!("Expected MessageEdited"),
        }
    }

    #[test]
    fn server_event_room_id_accessor() {
        let chat = ServerEvent::Chat {
            message: ChatMessage::user_message("alice", "hi", "acme/widgets"),
        };
        assert_eq!(chat.room_id(), Some("acme/widgets"));

        let established = ServerEvent::ConnectionEstablished {
            connection_id: "conn-1".to_string(),
        };
        assert_eq!(established.room_id(), None);

        let err = ServerEvent::Error {
            message: "nope".to_string(),
        };
        assert_eq!(err.room_id(), None);
    }

    #[test]
    fn server_event_ai_shared_scopes_to_repo() {
        let conv = AiConversation::pending("q", "alice", "acme/widgets");
        let ev = ServerEvent::AiShared { conversation: conv };
        assert_eq!(ev.room_id(), Some("acme/widgets"));
    }
}
