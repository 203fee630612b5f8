//! Relay metrics for observability
//!
//! Runtime counters for monitoring relay health, exposed on `/metrics`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Relay-wide metrics
#[derive(Debug)]
pub struct RelayMetrics {
    /// Currently active WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since relay start
    pub total_connections: AtomicU64,
    /// Client events successfully parsed
    pub events_received: AtomicU64,
    /// Events fanned out to a room
    pub events_relayed: AtomicU64,
    /// Broadcast events dropped because a receiver lagged
    pub events_dropped: AtomicU64,
    /// Inbound frames that failed to parse as a client event
    pub malformed_events: AtomicU64,
    /// Rooms created on demand
    pub rooms_created: AtomicU64,

    start_time: Instant,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            active_connections: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            events_received: AtomicU64::new(0),
            events_relayed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            malformed_events: AtomicU64::new(0),
            rooms_created: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_relayed(&self) {
        self.events_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lag(&self, dropped: u64) {
        self.events_dropped.fetch_add(dropped, Ordering::Relaxed);
    }

    pub fn malformed_event(&self) {
        self.malformed_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn room_created(&self) {
        self.rooms_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Snapshot of all counters (for the `/metrics` route and shutdown logs)
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_relayed: self.events_relayed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            malformed_events: self.malformed_events.load(Ordering::Relaxed),
            rooms_created: self.rooms_created.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of [`RelayMetrics`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub active_connections: u64,
    pub total_connections: u64,
    pub events_received: u64,
    pub events_relayed: u64,
    pub events_dropped: u64,
    pub malformed_events: u64,
    pub rooms_created: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_tracking() {
        let metrics = RelayMetrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.total_connections, 2);
    }

    #[test]
    fn event_counters() {
        let metrics = RelayMetrics::new();
        metrics.event_received();
        metrics.event_relayed();
        metrics.record_lag(7);
        metrics.malformed_event();
        metrics.room_created();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_received, 1);
        assert_eq!(snapshot.events_relayed, 1);
        assert_eq!(snapshot.events_dropped, 7);
        assert_eq!(snapshot.malformed_events, 1);
        assert_eq!(snapshot.rooms_created, 1);
    }

    #[test]
    fn snapshot_serializes() {
        let metrics = RelayMetrics::new();
        metrics.connection_opened();
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("active_connections"));
        assert!(json.contains("events_relayed"));
    }
}
