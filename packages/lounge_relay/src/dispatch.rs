//! Client event dispatcher
//!
//! One function handles every `ClientEvent` against a per-connection
//! context, so the WebSocket handler stays a thin transport loop. The relay
//! stays content-blind: it stamps routing fields and fans events out, and
//! that is all.

use std::sync::Arc;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use lounge_protocol::{ClientEvent, ServerEvent, now_millis};

use crate::metrics::RelayMetrics;
use crate::rooms::RoomRegistry;

/// Per-connection state shared between the transport layer and the
/// dispatcher.
pub struct ConnectionContext {
    pub connection_id: String,
    /// Outbound channel to this connection's WebSocket sender task.
    pub tx: mpsc::Sender<ServerEvent>,
    pub registry: Arc<RoomRegistry>,
    pub metrics: Arc<RelayMetrics>,
    /// Mirror of the registry's membership entry for this connection, kept
    /// so dispatch can deny room-scoped events without taking the registry
    /// lock.
    joined_room: RwLock<Option<String>>,
    /// Cancels the forwarding task of the current room on switch/leave.
    room_cancel: RwLock<Option<CancellationToken>>,
}

impl ConnectionContext {
    pub fn new(
        connection_id: String,
        tx: mpsc::Sender<ServerEvent>,
        registry: Arc<RoomRegistry>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            connection_id,
            tx,
            registry,
            metrics,
            joined_room: RwLock::new(None),
            room_cancel: RwLock::new(None),
        }
    }

    async fn current_room(&self) -> Option<String> {
        self.joined_room.read().await.clone()
    }

    /// Require room membership for a room-scoped event; answers with an
    /// `Error` event when the connection has not joined anywhere.
    async fn require_room(&self, what: &str) -> Option<String> {
        match self.current_room().await {
            Some(room) => Some(room),
            None => {
                debug!(conn = %self.connection_id, "Dropping {what} from connection outside any room");
                let _ = self
                    .tx
                    .send(ServerEvent::Error {
                        message: format!("cannot {what}: not in a room"),
                    })
                    .await;
                None
            }
        }
    }

    async fn cancel_room_forward(&self) {
        if let Some(cancel) = self.room_cancel.write().await.take() {
            cancel.cancel();
        }
    }
}

/// Dispatch a single parsed `ClientEvent`.
pub async fn dispatch_client_event(ctx: &Arc<ConnectionContext>, event: ClientEvent) {
    ctx.metrics.event_received();
    match event {
        ClientEvent::JoinRoom { room_id } => {
            // Tear down the old room's forwarding before the registry
            // broadcasts MemberLeft, so the switcher never sees its own
            // departure from the room it is leaving.
            ctx.cancel_room_forward().await;

            let rx = ctx.registry.join(&ctx.connection_id, &room_id).await;
            *ctx.joined_room.write().await = Some(room_id.clone());

            let cancel = CancellationToken::new();
            *ctx.room_cancel.write().await = Some(cancel.clone());
            spawn_room_forward(rx, ctx.tx.clone(), ctx.metrics.clone(), cancel);

            debug!(conn = %ctx.connection_id, room = %room_id, "Joined room");
        }
        ClientEvent::LeaveRoom { room_id } => {
            let was_current =
                ctx.joined_room.read().await.as_deref() == Some(room_id.as_str());
            if was_current {
                ctx.cancel_room_forward().await;
                *ctx.joined_room.write().await = None;
            }
            if !ctx.registry.leave(&ctx.connection_id, &room_id).await {
                debug!(conn = %ctx.connection_id, room = %room_id, "Leave for non-member ignored");
            }
        }
        ClientEvent::Chat { mut message } => {
            let Some(room_id) = ctx.require_room("send a message").await else {
                return;
            };
            // Preserve the client id so receivers can deduplicate the echo
            // of an optimistic insert; stamp one only when absent.
            if message.id.is_empty() {
                message.id = Uuid::new_v4().to_string();
            }
            if message.timestamp == 0 {
                message.timestamp = now_millis();
            }
            message.room_id = room_id.clone();
            message.is_own_message = false;
            ctx.registry
                .relay(&room_id, ServerEvent::Chat { message })
                .await;
            ctx.metrics.event_relayed();
        }
        ClientEvent::AiShared { mut conversation } => {
            let Some(room_id) = ctx.require_room("share an answer").await else {
                return;
            };
            conversation.repo_full_name = room_id.clone();
            ctx.registry
                .relay(&room_id, ServerEvent::AiShared { conversation })
                .await;
            ctx.metrics.event_relayed();
        }
        ClientEvent::TypingStart => {
            // Typing outside a room carries no information worth an error.
            if let Some(room_id) = ctx.current_room().await {
                ctx.registry
                    .relay(
                        &room_id,
                        ServerEvent::TypingStarted {
                            connection_id: ctx.connection_id.clone(),
                            room_id: room_id.clone(),
                        },
                    )
                    .await;
                ctx.metrics.event_relayed();
            }
        }
        ClientEvent::TypingStop => {
            if let Some(room_id) = ctx.current_room().await {
                ctx.registry
                    .relay(
                        &room_id,
                        ServerEvent::TypingStopped {
                            connection_id: ctx.connection_id.clone(),
                            room_id: room_id.clone(),
                        },
                    )
                    .await;
                ctx.metrics.event_relayed();
            }
        }
        ClientEvent::AddReaction {
            message_id,
            reaction,
        } => {
            let Some(room_id) = ctx.require_room("add a reaction").await else {
                return;
            };
            ctx.registry
                .relay(
                    &room_id,
                    ServerEvent::ReactionAdded {
                        message_id,
                        reaction,
                        user_id: ctx.connection_id.clone(),
                        room_id: room_id.clone(),
                    },
                )
                .await;
            ctx.metrics.event_relayed();
        }
        ClientEvent::RemoveReaction {
            message_id,
            reaction,
        } => {
            let Some(room_id) = ctx.require_room("remove a reaction").await else {
                return;
            };
            ctx.registry
                .relay(
                    &room_id,
                    ServerEvent::ReactionRemoved {
                        message_id,
                        reaction,
                        user_id: ctx.connection_id.clone(),
                        room_id: room_id.clone(),
                    },
                )
                .await;
            ctx.metrics.event_relayed();
        }
        ClientEvent::AddCodeSnippet {
            message_id,
            snippet,
        } => {
            let Some(room_id) = ctx.require_room("attach a snippet").await else {
                return;
            };
            ctx.registry
                .relay(
                    &room_id,
                    ServerEvent::CodeSnippetAdded {
                        message_id,
                        snippet,
                        user_id: ctx.connection_id.clone(),
                        room_id: room_id.clone(),
                    },
                )
                .await;
            ctx.metrics.event_relayed();
        }
        ClientEvent::EditMessage {
            message_id,
            new_text,
        } => {
            let Some(room_id) = ctx.require_room("edit a message").await else {
                return;
            };
            ctx.registry
                .relay(
                    &room_id,
                    ServerEvent::MessageEdited {
                        message_id,
                        new_text,
                        edited_at: now_millis(),
                        room_id: room_id.clone(),
                    },
                )
                .await;
            ctx.metrics.event_relayed();
        }
    }
}

/// Clean up connection state on disconnect: stop the room forwarder and
/// perform the implicit leave (the registry broadcasts the departure).
pub async fn disconnect_cleanup(ctx: &Arc<ConnectionContext>) {
    ctx.cancel_room_forward().await;
    if let Some(room_id) = ctx.registry.disconnect(&ctx.connection_id).await {
        debug!(conn = %ctx.connection_id, room = %room_id, "Disconnected from room");
    }
    *ctx.joined_room.write().await = None;
}

/// Copy a room's broadcast stream into a connection's outbound channel
/// until cancelled. A slow connection only loses its own lagged backlog;
/// the room's channel is untouched.
fn spawn_room_forward(
    mut rx: broadcast::Receiver<ServerEvent>,
    tx: mpsc::Sender<ServerEvent>,
    metrics: Arc<RelayMetrics>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            // Biased so cancellation wins over a ready broadcast: a switching
            // connection must not forward events from the room it just left.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = rx.recv() => match result {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        metrics.record_lag(n);
                        warn!("Room broadcast lagged by {} events for a connection", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use lounge_protocol::{AiConversation, ChatMessage};
    use std::time::Duration;

    fn make_test_ctx(
        connection_id: &str,
        registry: Arc<RoomRegistry>,
    ) -> (Arc<ConnectionContext>, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let metrics = Arc::new(RelayMetrics::new());
        let ctx = Arc::new(ConnectionContext::new(
            connection_id.to_string(),
            tx,
            registry,
            metrics,
        ));
        (ctx, rx)
    }

    fn shared_registry() -> Arc<RoomRegistry> {
        Arc::new(RoomRegistry::new(16, Arc::new(RelayMetrics::new())))
    }

    async fn recv(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn join_forwards_own_member_joined() {
        let registry = shared_registry();
        let (ctx, mut rx) = make_test_ctx("conn-a", registry.clone());

        dispatch_client_event(
            &ctx,
            ClientEvent::JoinRoom {
                room_id: "acme/widgets".into(),
            },
        )
        .await;

        assert!(registry.is_member("conn-a", "acme/widgets").await);
        match recv(&mut rx).await {
            ServerEvent::MemberJoined { connection_id, .. } => {
                assert_eq!(connection_id, "conn-a");
            }
            other => panic!("Expected MemberJoined, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_without_room_is_refused_locally() {
        let registry = shared_registry();
        let (ctx, mut rx) = make_test_ctx("conn-a", registry);

        dispatch_client_event(
            &ctx,
            ClientEvent::Chat {
                message: ChatMessage::user_message("alice", "hello", ""),
            },
        )
        .await;

        let msg = rx.try_recv().expect("expected an error event");
        match msg {
            ServerEvent::Error { message } => {
                assert!(message.contains("not in a room"));
            }
            other => panic!("Expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_is_stamped_and_echoed() {
        let registry = shared_registry();
        let (ctx, mut rx) = make_test_ctx("conn-a", registry);

        dispatch_client_event(
            &ctx,
            ClientEvent::JoinRoom {
                room_id: "acme/widgets".into(),
            },
        )
        .await;
        recv(&mut rx).await; // own MemberJoined

        let mut message = ChatMessage::user_message("alice", "hello", "spoofed/room");
        message.is_own_message = true;
        message.timestamp = 0;
        let sent_id = message.id.clone();
        dispatch_client_event(&ctx, ClientEvent::Chat { message }).await;

        match recv(&mut rx).await {
            ServerEvent::Chat { message } => {
                // Client id preserved, routing fields stamped by the relay.
                assert_eq!(message.id, sent_id);
                assert_eq!(message.room_id, "acme/widgets");
                assert!(message.timestamp > 0);
                assert!(!message.is_own_message);
            }
            other => panic!("Expected Chat echo, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_with_empty_id_gets_one_assigned() {
        let registry = shared_registry();
        let (ctx, mut rx) = make_test_ctx("conn-a", registry);

        dispatch_client_event(
            &ctx,
            ClientEvent::JoinRoom {
                room_id: "acme/widgets".into(),
            },
        )
        .await;
        recv(&mut rx).await;

        let mut message = ChatMessage::user_message("alice", "hello", "acme/widgets");
        message.id = String::new();
        dispatch_client_event(&ctx, ClientEvent::Chat { message }).await;

        match recv(&mut rx).await {
            ServerEvent::Chat { message } => assert!(!message.id.is_empty()),
            other => panic!("Expected Chat, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn room_switch_stops_old_room_traffic() {
        let registry = shared_registry();
        let (ctx_a, mut rx_a) = make_test_ctx("conn-a", registry.clone());
        let (ctx_b, mut rx_b) = make_test_ctx("conn-b", registry.clone());

        dispatch_client_event(
            &ctx_a,
            ClientEvent::JoinRoom {
                room_id: "acme/widgets".into(),
            },
        )
        .await;
        recv(&mut rx_a).await; // a's join
        dispatch_client_event(
            &ctx_b,
            ClientEvent::JoinRoom {
                room_id: "acme/widgets".into(),
            },
        )
        .await;
        recv(&mut rx_a).await; // b's join seen by a
        recv(&mut rx_b).await; // b's own join

        // a moves away; b stays behind and sees the departure.
        dispatch_client_event(
            &ctx_a,
            ClientEvent::JoinRoom {
                room_id: "other/repo".into(),
            },
        )
        .await;
        match recv(&mut rx_b).await {
            ServerEvent::MemberLeft { connection_id, .. } => {
                assert_eq!(connection_id, "conn-a");
            }
            other => panic!("Expected MemberLeft, got {other:?}"),
        }
        recv(&mut rx_a).await; // a's join of other/repo

        // b chats in the old room; a must not receive it.
        dispatch_client_event(
            &ctx_b,
            ClientEvent::Chat {
                message: ChatMessage::user_message("bob", "anyone here?", "acme/widgets"),
            },
        )
        .await;
        recv(&mut rx_b).await; // b's own echo
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            rx_a.try_recv().is_err(),
            "connection in other/repo must not see acme/widgets traffic"
        );
    }

    #[tokio::test]
    async fn leave_room_then_chat_is_refused() {
        let registry = shared_registry();
        let (ctx, mut rx) = make_test_ctx("conn-a", registry);

        dispatch_client_event(
            &ctx,
            ClientEvent::JoinRoom {
                room_id: "acme/widgets".into(),
            },
        )
        .await;
        recv(&mut rx).await;
        dispatch_client_event(
            &ctx,
            ClientEvent::LeaveRoom {
                room_id: "acme/widgets".into(),
            },
        )
        .await;

        dispatch_client_event(
            &ctx,
            ClientEvent::Chat {
                message: ChatMessage::user_message("alice", "hello", "acme/widgets"),
            },
        )
        .await;
        match recv(&mut rx).await {
            ServerEvent::Error { message } => assert!(message.contains("not in a room")),
            other => panic!("Expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reaction_events_are_stamped_with_sender() {
        let registry = shared_registry();
        let (ctx, mut rx) = make_test_ctx("conn-a", registry);

        dispatch_client_event(
            &ctx,
            ClientEvent::JoinRoom {
                room_id: "acme/widgets".into(),
            },
        )
        .await;
        recv(&mut rx).await;

        dispatch_client_event(
            &ctx,
            ClientEvent::AddReaction {
                message_id: "m1".into(),
                reaction: "🎉".into(),
            },
        )
        .await;
        match recv(&mut rx).await {
            ServerEvent::ReactionAdded {
                message_id,
                reaction,
                user_id,
                room_id,
            } => {
                assert_eq!(message_id, "m1");
                assert_eq!(reaction, "🎉");
                assert_eq!(user_id, "conn-a");
                assert_eq!(room_id, "acme/widgets");
            }
            other => panic!("Expected ReactionAdded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn edit_message_stamps_edited_at() {
        let registry = shared_registry();
        let (ctx, mut rx) = make_test_ctx("conn-a", registry);

        dispatch_client_event(
            &ctx,
            ClientEvent::JoinRoom {
                room_id: "acme/widgets".into(),
            },
        )
        .await;
        recv(&mut rx).await;

        dispatch_client_event(
            &ctx,
            ClientEvent::EditMessage {
                message_id: "m1".into(),
                new_text: "better".into(),
            },
        )
        .await;
        match recv(&mut rx).await {
            ServerEvent::MessageEdited {
                new_text, edited_at, ..
            } => {
                assert_eq!(new_text, "better");
                assert!(edited_at > 0);
            }
            other => panic!("Expected MessageEdited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ai_shared_is_rescoped_to_current_room() {
        let registry = shared_registry();
        let (ctx, mut rx) = make_test_ctx("conn-a", registry);

        dispatch_client_event(
            &ctx,
            ClientEvent::JoinRoom {
                room_id: "acme/widgets".into(),
            },
        )
        .await;
        recv(&mut rx).await;

        let mut conversation = AiConversation::pending("q", "alice", "spoofed/repo");
        conversation.resolve("a");
        dispatch_client_event(&ctx, ClientEvent::AiShared { conversation }).await;

        match recv(&mut rx).await {
            ServerEvent::AiShared { conversation } => {
                assert_eq!(conversation.repo_full_name, "acme/widgets");
            }
            other => panic!("Expected AiShared, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_cleanup_broadcasts_departure() {
        let registry = shared_registry();
        let (ctx_a, mut rx_a) = make_test_ctx("conn-a", registry.clone());
        let (ctx_b, mut rx_b) = make_test_ctx("conn-b", registry.clone());

        dispatch_client_event(
            &ctx_a,
            ClientEvent::JoinRoom {
                room_id: "acme/widgets".into(),
            },
        )
        .await;
        recv(&mut rx_a).await;
        dispatch_client_event(
            &ctx_b,
            ClientEvent::JoinRoom {
                room_id: "acme/widgets".into(),
            },
        )
        .await;
        recv(&mut rx_b).await;
        recv(&mut rx_a).await; // b joined

        disconnect_cleanup(&ctx_b).await;
        assert!(!registry.is_member("conn-b", "acme/widgets").await);
        match recv(&mut rx_a).await {
            ServerEvent::MemberLeft { connection_id, .. } => {
                assert_eq!(connection_id, "conn-b");
            }
            other => panic!("Expected MemberLeft, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn typing_outside_room_is_silently_dropped() {
        let registry = shared_registry();
        let (ctx, mut rx) = make_test_ctx("conn-a", registry);

        dispatch_client_event(&ctx, ClientEvent::TypingStart).await;
        assert!(rx.try_recv().is_err(), "no error event expected for typing");
    }
}
