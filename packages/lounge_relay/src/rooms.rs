//! Room Registry
//!
//! The relay's only shared mutable state: which connections are in which
//! room, and the per-room broadcast channel used for fan-out. All mutation
//! happens under one lock, so each membership operation runs to completion
//! before the next and every member of a room observes broadcasts in the
//! same relative order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use lounge_protocol::ServerEvent;

use crate::metrics::RelayMetrics;

struct Room {
    members: HashSet<String>,
    tx: broadcast::Sender<ServerEvent>,
}

#[derive(Default)]
struct RegistryInner {
    /// Room id → membership + fan-out channel. Rooms are created on first
    /// join and never destroyed; the key space is bounded by distinct
    /// repository names visited.
    rooms: HashMap<String, Room>,
    /// Connection id → the one room it currently occupies.
    memberships: HashMap<String, String>,
}

/// Room membership and fan-out broker.
pub struct RoomRegistry {
    inner: RwLock<RegistryInner>,
    channel_capacity: usize,
    metrics: Arc<RelayMetrics>,
}

impl RoomRegistry {
    pub fn new(channel_capacity: usize, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            channel_capacity,
            metrics,
        }
    }

    /// Add a connection to a room and subscribe it to the room's broadcasts.
    ///
    /// Enforces at-most-one-room: a connection already in a different room
    /// is removed from it first (with a `MemberLeft` broadcast to the old
    /// room). Re-joining the current room leaves the member set unchanged
    /// but still re-emits `MemberJoined`.
    ///
    /// The returned receiver is subscribed before `MemberJoined` is sent, so
    /// the joiner sees its own join notification.
    pub async fn join(
        &self,
        connection_id: &str,
        room_id: &str,
    ) -> broadcast::Receiver<ServerEvent> {
        let mut inner = self.inner.write().await;

        match inner.memberships.get(connection_id) {
            Some(prev) if prev != room_id => {
                let prev = prev.clone();
                Self::remove_member(&mut inner, connection_id, &prev);
            }
            _ => {}
        }

        let room = match inner.rooms.entry(room_id.to_string()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(self.channel_capacity);
                self.metrics.room_created();
                debug!(room = %room_id, "Room created on demand");
                entry.insert(Room {
                    members: HashSet::new(),
                    tx,
                })
            }
        };
        let rx = room.tx.subscribe();
        room.members.insert(connection_id.to_string());
        let _ = room.tx.send(ServerEvent::MemberJoined {
            connection_id: connection_id.to_string(),
            room_id: room_id.to_string(),
        });
        inner
            .memberships
            .insert(connection_id.to_string(), room_id.to_string());

        rx
    }

    /// Remove a connection from a room. Idempotent: returns false (with no
    /// broadcast) when the connection was not a member.
    pub async fn leave(&self, connection_id: &str, room_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        if inner.memberships.get(connection_id).map(String::as_str) != Some(room_id) {
            return false;
        }
        inner.memberships.remove(connection_id);
        Self::remove_member(&mut inner, connection_id, room_id)
    }

    /// Implicit leave for whatever room the connection occupied. Returns the
    /// room left, if any.
    pub async fn disconnect(&self, connection_id: &str) -> Option<String> {
        let mut inner = self.inner.write().await;
        let room_id = inner.memberships.remove(connection_id)?;
        Self::remove_member(&mut inner, connection_id, &room_id);
        Some(room_id)
    }

    /// Fan an event out to every member of a room. Returns the number of
    /// live subscribers reached (0 when the room has never been joined).
    pub async fn relay(&self, room_id: &str, event: ServerEvent) -> usize {
        let inner = self.inner.read().await;
        match inner.rooms.get(room_id) {
            Some(room) => room.tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// The room a connection currently occupies, if any.
    pub async fn current_room(&self, connection_id: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .memberships
            .get(connection_id)
            .cloned()
    }

    pub async fn is_member(&self, connection_id: &str, room_id: &str) -> bool {
        self.inner
            .read()
            .await
            .rooms
            .get(room_id)
            .is_some_and(|room| room.members.contains(connection_id))
    }

    pub async fn member_count(&self, room_id: &str) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(room_id)
            .map_or(0, |room| room.members.len())
    }

    /// Remove from the member set and notify the remaining members. The
    /// leaver's subscription is torn down by its connection task, so it does
    /// not see this broadcast.
    fn remove_member(inner: &mut RegistryInner, connection_id: &str, room_id: &str) -> bool {
        let Some(room) = inner.rooms.get_mut(room_id) else {
            return false;
        };
        if !room.members.remove(connection_id) {
            return false;
        }
        let _ = room.tx.send(ServerEvent::MemberLeft {
            connection_id: connection_id.to_string(),
            room_id: room_id.to_string(),
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lounge_protocol::ChatMessage;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(16, Arc::new(RelayMetrics::new()))
    }

    async fn expect_event(rx: &mut broadcast::Receiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for broadcast")
            .expect("broadcast channel closed")
    }

    #[tokio::test]
    async fn join_creates_room_and_notifies_joiner() {
        let reg = registry();
        let mut rx = reg.join("conn-a", "acme/widgets").await;

        assert!(reg.is_member("conn-a", "acme/widgets").await);
        match expect_event(&mut rx).await {
            ServerEvent::MemberJoined {
                connection_id,
                room_id,
            } => {
                assert_eq!(connection_id, "conn-a");
                assert_eq!(room_id, "acme/widgets");
            }
            other => panic!("Expected MemberJoined, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejoin_same_room_is_set_noop_but_renotifies() {
        let reg = registry();
        let _rx1 = reg.join("conn-a", "acme/widgets").await;
        let mut rx2 = reg.join("conn-a", "acme/widgets").await;

        assert_eq!(reg.member_count("acme/widgets").await, 1);
        // The fresh subscription still sees the re-emitted join.
        match expect_event(&mut rx2).await {
            ServerEvent::MemberJoined { connection_id, .. } => {
                assert_eq!(connection_id, "conn-a");
            }
            other => panic!("Expected MemberJoined, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn join_second_room_implicitly_leaves_first() {
        let reg = registry();
        let mut observer = reg.join("conn-b", "acme/widgets").await;
        expect_event(&mut observer).await; // conn-b's own join

        let _rx_a = reg.join("conn-a", "acme/widgets").await;
        expect_event(&mut observer).await; // conn-a joined

        let _rx_a2 = reg.join("conn-a", "other/repo").await;

        assert!(!reg.is_member("conn-a", "acme/widgets").await);
        assert!(reg.is_member("conn-a", "other/repo").await);
        assert_eq!(reg.current_room("conn-a").await.as_deref(), Some("other/repo"));

        match expect_event(&mut observer).await {
            ServerEvent::MemberLeft {
                connection_id,
                room_id,
            } => {
                assert_eq!(connection_id, "conn-a");
                assert_eq!(room_id, "acme/widgets");
            }
            other => panic!("Expected MemberLeft, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let reg = registry();
        let _rx = reg.join("conn-a", "acme/widgets").await;

        assert!(reg.leave("conn-a", "acme/widgets").await);
        assert!(!reg.is_member("conn-a", "acme/widgets").await);
        // Leaving twice is safe and reports false.
        assert!(!reg.leave("conn-a", "acme/widgets").await);
        // Leaving a room never joined is a no-op too.
        assert!(!reg.leave("conn-a", "never/joined").await);
    }

    #[tokio::test]
    async fn leave_notifies_remaining_members_only() {
        let reg = registry();
        let mut rx_b = reg.join("conn-b", "acme/widgets").await;
        expect_event(&mut rx_b).await; // own join
        let _rx_a = reg.join("conn-a", "acme/widgets").await;
        expect_event(&mut rx_b).await; // a joined

        reg.leave("conn-a", "acme/widgets").await;
        match expect_event(&mut rx_b).await {
            ServerEvent::MemberLeft { connection_id, .. } => {
                assert_eq!(connection_id, "conn-a");
            }
            other => panic!("Expected MemberLeft, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_acts_as_leave() {
        let reg = registry();
        let _rx = reg.join("conn-a", "acme/widgets").await;

        let left = reg.disconnect("conn-a").await;
        assert_eq!(left.as_deref(), Some("acme/widgets"));
        assert!(!reg.is_member("conn-a", "acme/widgets").await);
        assert!(reg.current_room("conn-a").await.is_none());
        // Disconnecting an unknown connection is harmless.
        assert!(reg.disconnect("conn-a").await.is_none());
    }

    #[tokio::test]
    async fn relay_reaches_all_members() {
        let reg = registry();
        let mut rx_a = reg.join("conn-a", "acme/widgets").await;
        let mut rx_b = reg.join("conn-b", "acme/widgets").await;
        expect_event(&mut rx_a).await; // a joined
        expect_event(&mut rx_a).await; // b joined
        expect_event(&mut rx_b).await; // b joined

        let message = ChatMessage::user_message("alice", "hello", "acme/widgets");
        let reached = reg
            .relay("acme/widgets", ServerEvent::Chat { message })
            .await;
        assert_eq!(reached, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            match expect_event(rx).await {
                ServerEvent::Chat { message } => assert_eq!(message.text, "hello"),
                other => panic!("Expected Chat, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn relay_to_unknown_room_reaches_nobody() {
        let reg = registry();
        let message = ChatMessage::user_message("alice", "hello", "ghost/town");
        let reached = reg.relay("ghost/town", ServerEvent::Chat { message }).await;
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn empty_rooms_persist() {
        let reg = registry();
        let _rx = reg.join("conn-a", "acme/widgets").await;
        reg.leave("conn-a", "acme/widgets").await;

        assert_eq!(reg.member_count("acme/widgets").await, 0);
        // The room still exists: a later relay finds the channel (0 live
        // receivers, but no room re-creation).
        let metrics_before = reg.metrics.snapshot().rooms_created;
        let _rx2 = reg.join("conn-b", "acme/widgets").await;
        assert_eq!(reg.metrics.snapshot().rooms_created, metrics_before);
    }
}
