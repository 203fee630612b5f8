//! Session manager
//!
//! One logical channel per process: a driver task owns the WebSocket and
//! its reconnect loop, the manager owns the active room's local log, and
//! the UI observes both through subscription handles. Nothing in here
//! throws on a peer's misbehavior — every failure path ends in a status
//! transition or a locally-synthesized system message.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lounge_protocol::{AiConversation, ChatMessage, ClientEvent, CodeSnippet, ServerEvent};

use crate::log::RoomLog;

/// Connection lifecycle. `Idle` is the state before any attempt and the
/// state restored on explicit teardown; `Disconnected` and `Error` both
/// recover to `Connecting` through the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Full channel endpoint, e.g. `ws://127.0.0.1:3001/ws`.
    pub server_url: String,
    /// Display identity attached to authored messages and questions.
    pub user: String,
    pub connect_timeout: Duration,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// 0 retries forever; any other value bounds the retry loop.
    pub max_reconnect_attempts: u32,
}

impl SessionConfig {
    pub fn new(server_url: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            user: user.into(),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(2),
            max_reconnect_attempts: 0,
        }
    }
}

/// Deltas the UI subscribes to. The log snapshot plus this stream is the
/// whole rendering contract.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    MessageAppended(ChatMessage),
    /// An existing message mutated in place (reaction, edit, snippet,
    /// reply count).
    MessageUpdated(ChatMessage),
    ConversationUpserted(AiConversation),
    MemberJoined {
        connection_id: String,
        room_id: String,
    },
    MemberLeft {
        connection_id: String,
        room_id: String,
    },
    TypingChanged {
        connection_id: String,
        active: bool,
    },
}

/// Subscription handle for session events. Dropping it unsubscribes —
/// there is no off() to forget.
pub struct SessionEvents {
    rx: broadcast::Receiver<SessionEvent>,
}

impl SessionEvents {
    /// Next event, or None once the session is gone. Lagged gaps are
    /// logged and skipped.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Session event subscriber lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct SessionState {
    active_room: Option<String>,
    log: RoomLog,
    /// Server-assigned id for the current transport, from the
    /// `ConnectionEstablished` handshake frame.
    connection_id: Option<String>,
}

struct SessionInner {
    config: SessionConfig,
    status_tx: watch::Sender<ConnStatus>,
    events_tx: broadcast::Sender<SessionEvent>,
    outbound_tx: mpsc::Sender<ClientEvent>,
    /// Taken by the driver task while it runs, returned on exit.
    outbound_rx: Mutex<Option<mpsc::Receiver<ClientEvent>>>,
    state: Mutex<SessionState>,
    driver_running: AtomicBool,
    cancel: std::sync::Mutex<CancellationToken>,
}

/// An explicitly owned session handle — construct it, inject it where the
/// UI needs it, tear it down when the tab goes away. Cloning shares the
/// same underlying session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        let (status_tx, _) = watch::channel(ConnStatus::Idle);
        let (events_tx, _) = broadcast::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        Self {
            inner: Arc::new(SessionInner {
                config,
                status_tx,
                events_tx,
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                state: Mutex::new(SessionState {
                    active_room: None,
                    log: RoomLog::new(),
                    connection_id: None,
                }),
                driver_running: AtomicBool::new(false),
                cancel: std::sync::Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Start the transport driver. Idempotent: calling again while a driver
    /// is alive changes nothing — one channel per session, always.
    pub fn connect(&self) {
        if self
            .inner
            .driver_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("connect() on a live session is a no-op");
            return;
        }

        let cancel = CancellationToken::new();
        *self.inner.cancel.lock().expect("cancel lock poisoned") = cancel.clone();

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let Some(outbound_rx) = inner.outbound_rx.lock().await.take() else {
                error!("Session driver started without an outbound queue");
                inner.driver_running.store(false, Ordering::SeqCst);
                return;
            };
            let outbound_rx = run_driver(&inner, outbound_rx, cancel).await;
            *inner.outbound_rx.lock().await = Some(outbound_rx);
            inner.driver_running.store(false, Ordering::SeqCst);
        });
    }

    /// Explicit teardown: stop the driver and return to `Idle`. The local
    /// log survives until the next room switch.
    pub fn shutdown(&self) {
        self.inner
            .cancel
            .lock()
            .expect("cancel lock poisoned")
            .cancel();
    }

    pub fn status(&self) -> watch::Receiver<ConnStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn current_status(&self) -> ConnStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn events(&self) -> SessionEvents {
        SessionEvents {
            rx: self.inner.events_tx.subscribe(),
        }
    }

    pub async fn active_room(&self) -> Option<String> {
        self.inner.state.lock().await.active_room.clone()
    }

    pub async fn connection_id(&self) -> Option<String> {
        self.inner.state.lock().await.connection_id.clone()
    }

    /// Clone of the active room's log (messages, conversations).
    pub async fn log_snapshot(&self) -> (Vec<ChatMessage>, Vec<AiConversation>) {
        let state = self.inner.state.lock().await;
        (
            state.log.messages().to_vec(),
            state.log.conversations().to_vec(),
        )
    }

    /// Enter a room. Switching rooms discards the prior room's log;
    /// re-joining the active room (the reconnect path) keeps it.
    pub async fn join_room(&self, room_id: &str) -> bool {
        if self.current_status() != ConnStatus::Connected {
            warn!(room = %room_id, "Cannot join room: not connected");
            return false;
        }
        {
            let mut state = self.inner.state.lock().await;
            if state.active_room.as_deref() != Some(room_id) {
                state.active_room = Some(room_id.to_string());
                state.log = RoomLog::new();
            }
        }
        self.emit_client_event(ClientEvent::JoinRoom {
            room_id: room_id.to_string(),
        })
        .await;
        true
    }

    pub async fn leave_room(&self, room_id: &str) -> bool {
        if self.current_status() != ConnStatus::Connected {
            warn!(room = %room_id, "Cannot leave room: not connected");
            return false;
        }
        {
            let mut state = self.inner.state.lock().await;
            if state.active_room.as_deref() == Some(room_id) {
                state.active_room = None;
                state.log = RoomLog::new();
            }
        }
        self.emit_client_event(ClientEvent::LeaveRoom {
            room_id: room_id.to_string(),
        })
        .await;
        true
    }

    /// Send a message to the active room with an optimistic local insert.
    /// When not connected (or not in a room) the failure surfaces as a
    /// system message in the log instead of an error return.
    pub async fn send_message(&self, text: &str) -> ChatMessage {
        self.send_message_inner(text, None).await
    }

    /// A threaded reply: an ordinary message carrying its parent's id.
    pub async fn send_reply(&self, parent_id: &str, text: &str) -> ChatMessage {
        self.send_message_inner(text, Some(parent_id.to_string()))
            .await
    }

    async fn send_message_inner(&self, text: &str, parent_id: Option<String>) -> ChatMessage {
        let connected = self.current_status() == ConnStatus::Connected;
        let mut state = self.inner.state.lock().await;
        let room = state
            .active_room
            .clone()
            .unwrap_or_else(|| "unknown".to_string());

        if !connected || state.active_room.is_none() {
            warn!("Cannot send message: not connected to a room");
            let notice =
                ChatMessage::system("Cannot send message: not connected to the lounge.", room);
            state.log.append(notice.clone());
            drop(state);
            self.emit(SessionEvent::MessageAppended(notice.clone()));
            return notice;
        }

        let mut message = ChatMessage::user_message(&self.inner.config.user, text, &room);
        message.is_own_message = true;
        message.parent_id = parent_id;

        // Mark seen before the wire send: the relay echoes our id back and
        // the echo must deduplicate against this insert.
        state.log.mark_seen(message.id.clone());
        if let Some(parent_id) = message.parent_id.clone() {
            if let Some(parent) = state.log.increment_reply_count(&parent_id) {
                let parent = parent.clone();
                self.emit(SessionEvent::MessageUpdated(parent));
            }
        }
        state.log.append(message.clone());
        drop(state);

        self.emit(SessionEvent::MessageAppended(message.clone()));
        self.emit_client_event(ClientEvent::Chat {
            message: message.clone(),
        })
        .await;
        message
    }

    pub async fn add_reaction(&self, message_id: &str, reaction: &str) {
        self.room_scoped_event(ClientEvent::AddReaction {
            message_id: message_id.to_string(),
            reaction: reaction.to_string(),
        })
        .await;
    }

    pub async fn remove_reaction(&self, message_id: &str, reaction: &str) {
        self.room_scoped_event(ClientEvent::RemoveReaction {
            message_id: message_id.to_string(),
            reaction: reaction.to_string(),
        })
        .await;
    }

    pub async fn add_code_snippet(&self, message_id: &str, snippet: CodeSnippet) {
        self.room_scoped_event(ClientEvent::AddCodeSnippet {
            message_id: message_id.to_string(),
            snippet,
        })
        .await;
    }

    pub async fn edit_message(&self, message_id: &str, new_text: &str) {
        self.room_scoped_event(ClientEvent::EditMessage {
            message_id: message_id.to_string(),
            new_text: new_text.to_string(),
        })
        .await;
    }

    pub async fn start_typing(&self) {
        self.room_scoped_event(ClientEvent::TypingStart).await;
    }

    pub async fn stop_typing(&self) {
        self.room_scoped_event(ClientEvent::TypingStop).await;
    }

    /// Record a freshly asked question in the local log (loading, no
    /// answer). Returns None when no room is active.
    pub async fn begin_conversation(&self, question: &str) -> Option<AiConversation> {
        let mut state = self.inner.state.lock().await;
        let room = state.active_room.clone()?;
        let conversation = AiConversation::pending(question, &self.inner.config.user, room);
        state.log.upsert_conversation(conversation.clone());
        drop(state);
        self.emit(SessionEvent::ConversationUpserted(conversation.clone()));
        Some(conversation)
    }

    /// Apply the one terminal transition for a conversation. A second call
    /// for the same id returns the settled copy unchanged.
    pub async fn complete_conversation(
        &self,
        id: &str,
        outcome: Result<String, String>,
    ) -> Option<AiConversation> {
        let mut state = self.inner.state.lock().await;
        let conversation = state.log.find_conversation_mut(id)?;
        if !conversation.is_loading {
            return Some(conversation.clone());
        }
        match outcome {
            Ok(answer) => conversation.resolve(answer),
            Err(error) => conversation.fail(error),
        }
        let snapshot = conversation.clone();
        drop(state);
        self.emit(SessionEvent::ConversationUpserted(snapshot.clone()));
        Some(snapshot)
    }

    /// Broadcast a completed Q&A pair so the room doesn't ask twice.
    pub async fn share_conversation(&self, conversation: &AiConversation) -> bool {
        if self.current_status() != ConnStatus::Connected {
            warn!("Cannot share AI answer: not connected");
            return false;
        }
        self.emit_client_event(ClientEvent::AiShared {
            conversation: conversation.clone(),
        })
        .await;
        true
    }

    async fn room_scoped_event(&self, event: ClientEvent) {
        if self.current_status() != ConnStatus::Connected {
            warn!("Dropping room event: not connected");
            return;
        }
        if self.inner.state.lock().await.active_room.is_none() {
            warn!("Dropping room event: no active room");
            return;
        }
        self.emit_client_event(event).await;
    }

    async fn emit_client_event(&self, event: ClientEvent) {
        if self.inner.outbound_tx.send(event).await.is_err() {
            error!("Outbound queue closed — session driver is gone");
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.inner.events_tx.send(event);
    }
}

impl SessionInner {
    fn set_status(&self, status: ConnStatus) {
        self.status_tx.send_replace(status);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Synthesize a system message into the active room's log. No room, no
    /// message — there is nowhere to show it.
    async fn push_system_notice(&self, text: &str) {
        let mut state = self.state.lock().await;
        let Some(room) = state.active_room.clone() else {
            return;
        };
        let notice = ChatMessage::system(text, room);
        state.log.append(notice.clone());
        drop(state);
        self.emit(SessionEvent::MessageAppended(notice));
    }

    /// Reconcile one inbound relay event with local state: filter by room,
    /// deduplicate by id, then apply.
    async fn apply_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::ConnectionEstablished { connection_id } => {
                debug!(conn = %connection_id, "Channel established");
                self.state.lock().await.connection_id = Some(connection_id);
            }
            ServerEvent::Chat { message } => {
                let mut state = self.state.lock().await;
                if state.active_room.as_deref() != Some(message.room_id.as_str()) {
                    debug!(room = %message.room_id, "Dropping chat for inactive room");
                    return;
                }
                if state.log.is_seen(&message.id) {
                    debug!(id = %message.id, "Suppressing echo of own message");
                    return;
                }
                state.log.mark_seen(message.id.clone());
                if let Some(parent_id) = message.parent_id.clone() {
                    if let Some(parent) = state.log.increment_reply_count(&parent_id) {
                        let parent = parent.clone();
                        self.emit(SessionEvent::MessageUpdated(parent));
                    }
                }
                state.log.append(message.clone());
                drop(state);
                self.emit(SessionEvent::MessageAppended(message));
            }
            ServerEvent::AiShared { conversation } => {
                let mut state = self.state.lock().await;
                if state.active_room.as_deref() != Some(conversation.repo_full_name.as_str()) {
                    return;
                }
                state.log.upsert_conversation(conversation.clone());
                drop(state);
                self.emit(SessionEvent::ConversationUpserted(conversation));
            }
            ServerEvent::MemberJoined {
                connection_id,
                room_id,
            } => {
                let state = self.state.lock().await;
                if state.active_room.as_deref() != Some(room_id.as_str()) {
                    return;
                }
                let own = state.connection_id.as_deref() == Some(connection_id.as_str());
                drop(state);
                let text = if own {
                    format!("You joined the lounge for {room_id}.")
                } else {
                    "A participant joined the lounge.".to_string()
                };
                self.push_system_notice(&text).await;
                self.emit(SessionEvent::MemberJoined {
                    connection_id,
                    room_id,
                });
            }
            ServerEvent::MemberLeft {
                connection_id,
                room_id,
            } => {
                let state = self.state.lock().await;
                if state.active_room.as_deref() != Some(room_id.as_str()) {
                    return;
                }
                let own = state.connection_id.as_deref() == Some(connection_id.as_str());
                drop(state);
                if !own {
                    self.push_system_notice("A participant left the lounge.").await;
                }
                self.emit(SessionEvent::MemberLeft {
                    connection_id,
                    room_id,
                });
            }
            ServerEvent::TypingStarted {
                connection_id,
                room_id,
            } => {
                self.apply_typing(connection_id, room_id, true).await;
            }
            ServerEvent::TypingStopped {
                connection_id,
                room_id,
            } => {
                self.apply_typing(connection_id, room_id, false).await;
            }
            ServerEvent::ReactionAdded {
                message_id,
                reaction,
                room_id,
                ..
            } => {
                self.apply_mutation(&room_id, |log| {
                    log.add_reaction(&message_id, &reaction).cloned()
                })
                .await;
            }
            ServerEvent::ReactionRemoved {
                message_id,
                reaction,
                room_id,
                ..
            } => {
                self.apply_mutation(&room_id, |log| {
                    log.remove_reaction(&message_id, &reaction).cloned()
                })
                .await;
            }
            ServerEvent::CodeSnippetAdded {
                message_id,
                snippet,
                room_id,
                ..
            } => {
                self.apply_mutation(&room_id, |log| {
                    log.add_snippet(&message_id, snippet.clone()).cloned()
                })
                .await;
            }
            ServerEvent::MessageEdited {
                message_id,
                new_text,
                room_id,
                ..
            } => {
                self.apply_mutation(&room_id, |log| {
                    log.apply_edit(&message_id, &new_text).cloned()
                })
                .await;
            }
            ServerEvent::Error { message } => {
                warn!("Relay error: {}", message);
                self.push_system_notice(&format!("Server error: {message}"))
                    .await;
            }
        }
    }

    /// Typing indicators: room-filtered, own echoes dropped.
    async fn apply_typing(&self, connection_id: String, room_id: String, active: bool) {
        let state = self.state.lock().await;
        if state.active_room.as_deref() != Some(room_id.as_str()) {
            return;
        }
        if state.connection_id.as_deref() == Some(connection_id.as_str()) {
            return;
        }
        drop(state);
        self.emit(SessionEvent::TypingChanged {
            connection_id,
            active,
        });
    }

    /// Run a log mutation if the event targets the active room; emit the
    /// updated message when it changed something.
    async fn apply_mutation<F>(&self, room_id: &str, mutate: F)
    where
        F: FnOnce(&mut RoomLog) -> Option<ChatMessage>,
    {
        let mut state = self.state.lock().await;
        if state.active_room.as_deref() != Some(room_id) {
            return;
        }
        let updated = mutate(&mut state.log);
        drop(state);
        if let Some(message) = updated {
            self.emit(SessionEvent::MessageUpdated(message));
        }
    }
}

enum EndReason {
    Shutdown,
    TransportClosed,
}

/// Connect / reconnect loop. Returns the outbound receiver so a later
/// `connect()` can restart the driver with the same queue.
async fn run_driver(
    inner: &Arc<SessionInner>,
    mut outbound_rx: mpsc::Receiver<ClientEvent>,
    cancel: CancellationToken,
) -> mpsc::Receiver<ClientEvent> {
    let mut attempts: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        inner.set_status(ConnStatus::Connecting);
        debug!(url = %inner.config.server_url, "Connecting to lounge relay");

        let attempt = tokio::time::timeout(
            inner.config.connect_timeout,
            tokio_tungstenite::connect_async(inner.config.server_url.as_str()),
        );
        match attempt.await {
            Ok(Ok((stream, _response))) => {
                attempts = 0;
                inner.set_status(ConnStatus::Connected);
                info!("Connected to lounge relay");
                match drive_connection(inner, stream, &mut outbound_rx, &cancel).await {
                    EndReason::Shutdown => break,
                    EndReason::TransportClosed => {
                        warn!("Lounge relay connection dropped");
                        inner.set_status(ConnStatus::Disconnected);
                        inner
                            .push_system_notice("Disconnected from the lounge server.")
                            .await;
                    }
                }
            }
            Ok(Err(e)) => {
                warn!("Connection to lounge relay failed: {}", e);
                inner.set_status(ConnStatus::Error);
                if attempts == 0 {
                    inner
                        .push_system_notice(&format!("Connection error: {e}"))
                        .await;
                }
            }
            Err(_elapsed) => {
                warn!("Connection to lounge relay timed out");
                inner.set_status(ConnStatus::Error);
                if attempts == 0 {
                    inner.push_system_notice("Connection timed out.").await;
                }
            }
        }

        attempts += 1;
        let max = inner.config.max_reconnect_attempts;
        if max != 0 && attempts >= max {
            warn!("Giving up after {} reconnect attempts", attempts);
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(inner.config.reconnect_delay) => {}
        }
    }

    if cancel.is_cancelled() {
        inner.set_status(ConnStatus::Idle);
    }
    outbound_rx
}

/// Pump one live connection: outbound queue → socket, socket → state.
async fn drive_connection(
    inner: &Arc<SessionInner>,
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    outbound_rx: &mut mpsc::Receiver<ClientEvent>,
    cancel: &CancellationToken,
) -> EndReason {
    let (mut sink, mut stream) = stream.split();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.close().await;
                return EndReason::Shutdown;
            }
            maybe_event = outbound_rx.recv() => match maybe_event {
                Some(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            error!("Failed to serialize client event: {}", e);
                            continue;
                        }
                    };
                    if sink.send(tungstenite::Message::Text(json.into())).await.is_err() {
                        return EndReason::TransportClosed;
                    }
                }
                None => return EndReason::Shutdown,
            },
            frame = stream.next() => match frame {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => inner.apply_server_event(event).await,
                        Err(e) => warn!("Ignoring malformed server event: {}", e),
                    }
                }
                Some(Ok(tungstenite::Message::Close(_))) | None => {
                    return EndReason::TransportClosed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    return EndReason::TransportClosed;
                }
            }
        }
    }
}
