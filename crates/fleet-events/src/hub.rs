//! Room-based websocket broadcast hub.
//!
//! Rooms follow the `severity:<critical|warning|info|all>` convention.
//! The hub is set once at startup; broadcasting through a hub that was
//! never installed is a no-op, which keeps tests that don't care about
//! the transport layer simple.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use fleet_common::Severity;

const ALL_ROOM: &str = "severity:all";

fn room_for(severity: Severity) -> &'static str {
    severity.room()
}

struct Room {
    tx: broadcast::Sender<Arc<str>>,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }
}

/// Per-room broadcast fanout. Each room is an independent `broadcast`
/// channel so a slow consumer in one room never blocks another.
pub struct WebsocketHub {
    rooms: RwLock<HashMap<&'static str, Room>>,
}

impl WebsocketHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
        })
    }

    fn room_sender(&self, name: &'static str) -> broadcast::Sender<Arc<str>> {
        if let Some(room) = self.rooms.read().get(name) {
            return room.tx.clone();
        }
        let mut rooms = self.rooms.write();
        rooms.entry(name).or_insert_with(Room::new).tx.clone()
    }

    /// Subscribes to a room's raw JSON message stream. Unknown rooms are
    /// created lazily so subscribers never race against the first publish.
    pub fn subscribe(&self, room: &'static str) -> broadcast::Receiver<Arc<str>> {
        self.room_sender(room).subscribe()
    }

    fn publish(&self, room: &'static str, payload: &impl Serialize) {
        let json = match serde_json::to_string(payload) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, room, "failed to serialize broadcast payload");
                return;
            }
        };
        // No receivers is not an error: nobody is watching this room yet.
        let _ = self.room_sender(room).send(Arc::from(json.as_str()));
    }

    /// Broadcasts a single insight batch to `severity:all`.
    pub fn broadcast_insights_batch(&self, insights: &[fleet_common::Insight]) {
        self.publish(ALL_ROOM, &serde_json::json!({ "event": "insights:batch", "insights": insights }));
    }

    /// Broadcasts one insight to its severity room.
    pub fn broadcast_insight(&self, insight: &fleet_common::Insight) {
        self.publish(
            room_for(insight.severity),
            &serde_json::json!({ "event": "insights:new", "insight": insight }),
        );
    }

    /// Broadcasts an action row change on the remediation namespace.
    pub fn broadcast_action(&self, action: &fleet_common::Action) {
        self.publish("remediation", &serde_json::json!({ "event": "action:updated", "action": action }));
    }

    /// Broadcasts a monitoring cycle's summary counters to `severity:all`
    /// once the cycle finishes, independent of any per-insight broadcasts
    /// already sent during the cycle.
    pub fn broadcast_cycle_complete(&self, duration_ms: i64, endpoints: u32, containers: u32, total_insights: u32) {
        self.publish(
            ALL_ROOM,
            &serde_json::json!({
                "event": "cycle:complete",
                "duration": duration_ms,
                "endpoints": endpoints,
                "containers": containers,
                "totalInsights": total_insights,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_insight(severity: Severity) -> fleet_common::Insight {
        fleet_common::Insight {
            id: Uuid::nil(),
            endpoint_id: None,
            endpoint_name: None,
            container_id: None,
            container_name: None,
            severity,
            category: "test".to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            suggested_action: None,
            created_at: Utc::now(),
            is_acknowledged: false,
        }
    }

    #[tokio::test]
    async fn broadcast_insight_lands_in_its_severity_room() {
        let hub = WebsocketHub::new();
        let mut rx = hub.subscribe(Severity::Critical.room());
        hub.broadcast_insight(&sample_insight(Severity::Critical));
        let message = rx.recv().await.unwrap();
        assert!(message.contains("insights:new"));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let hub = WebsocketHub::new();
        hub.broadcast_insights_batch(&[sample_insight(Severity::Info)]);
    }

    #[tokio::test]
    async fn cycle_complete_lands_on_the_all_room() {
        let hub = WebsocketHub::new();
        let mut rx = hub.subscribe(ALL_ROOM);
        hub.broadcast_cycle_complete(1200, 3, 42, 5);
        let message = rx.recv().await.unwrap();
        assert!(message.contains("cycle:complete"));
        assert!(message.contains("\"totalInsights\":5"));
    }
}
