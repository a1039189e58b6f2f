//! In-process typed event bus.
//!
//! Handlers run synchronously on the emitter's task by default, and one
//! handler's panic-free error does not stop the rest from running.
//! Grounded on the predecessor's `AlertManager`: a channel feeding a
//! background dispatch task, generalized here to a broadcast channel so
//! an arbitrary number of subscribers (the websocket hub, the SSE stream,
//! the notification dispatcher) can all observe every event.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use fleet_common::{Incident, Insight};

/// Tagged union of every event the cycle and remediation machine emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DomainEvent {
    #[serde(rename = "insight.created")]
    InsightCreated { insight: Box<Insight> },
    #[serde(rename = "anomaly.detected")]
    AnomalyDetected { insight: Box<Insight> },
    #[serde(rename = "incident.created")]
    IncidentCreated { incident: Box<Incident> },
    #[serde(rename = "container.state_change")]
    ContainerStateChange {
        container_id: String,
        endpoint_id: i64,
        previous_state: String,
        current_state: String,
    },
    #[serde(rename = "remediation.requested")]
    RemediationRequested { action_id: Uuid },
    #[serde(rename = "remediation.approved")]
    RemediationApproved { action_id: Uuid },
    #[serde(rename = "remediation.rejected")]
    RemediationRejected { action_id: Uuid },
    #[serde(rename = "remediation.completed")]
    RemediationCompleted { action_id: Uuid, success: bool },
}

impl DomainEvent {
    /// The `prefix.*` wildcard family this event belongs to, e.g.
    /// `"remediation"` for every `remediation.*` variant.
    pub fn prefix(&self) -> &'static str {
        match self {
            DomainEvent::InsightCreated { .. } => "insight",
            DomainEvent::AnomalyDetected { .. } => "anomaly",
            DomainEvent::IncidentCreated { .. } => "incident",
            DomainEvent::ContainerStateChange { .. } => "container",
            DomainEvent::RemediationRequested { .. }
            | DomainEvent::RemediationApproved { .. }
            | DomainEvent::RemediationRejected { .. }
            | DomainEvent::RemediationCompleted { .. } => "remediation",
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::InsightCreated { .. } => "insight.created",
            DomainEvent::AnomalyDetected { .. } => "anomaly.detected",
            DomainEvent::IncidentCreated { .. } => "incident.created",
            DomainEvent::ContainerStateChange { .. } => "container.state_change",
            DomainEvent::RemediationRequested { .. } => "remediation.requested",
            DomainEvent::RemediationApproved { .. } => "remediation.approved",
            DomainEvent::RemediationRejected { .. } => "remediation.rejected",
            DomainEvent::RemediationCompleted { .. } => "remediation.completed",
        }
    }
}

type Handler = Box<dyn Fn(&DomainEvent) + Send + Sync>;

/// Subscription handle; dropping it does nothing; call `unsubscribe()`.
pub struct Subscription {
    id: u64,
    bus: Arc<EventBusInner>,
    wildcard: bool,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if self.wildcard {
            self.bus.any_handlers.write().retain(|(id, _)| *id != self.id);
        } else {
            self.bus.handlers.write().retain(|(id, _, _)| *id != self.id);
        }
    }
}

struct EventBusInner {
    handlers: RwLock<Vec<(u64, &'static str, Handler)>>,
    any_handlers: RwLock<Vec<(u64, Handler)>>,
    next_id: std::sync::atomic::AtomicU64,
    broadcast_tx: broadcast::Sender<DomainEvent>,
}

/// Decoupled emit/dispatch event bus plus a broadcast channel feeding the
/// websocket hub and SSE stream.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl EventBus {
    pub fn new(broadcast_capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(broadcast_capacity);
        Self {
            inner: Arc::new(EventBusInner {
                handlers: RwLock::new(Vec::new()),
                any_handlers: RwLock::new(Vec::new()),
                next_id: std::sync::atomic::AtomicU64::new(0),
                broadcast_tx,
            }),
        }
    }

    /// Subscribes to exactly one event type, e.g. `"insight.created"`.
    pub fn on(&self, event_type: &'static str, handler: impl Fn(&DomainEvent) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.inner.handlers.write().push((id, event_type, Box::new(handler)));
        Subscription {
            id,
            bus: self.inner.clone(),
            wildcard: false,
        }
    }

    /// Subscribes to every event emitted on the bus.
    pub fn on_any(&self, handler: impl Fn(&DomainEvent) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.inner.any_handlers.write().push((id, Box::new(handler)));
        Subscription {
            id,
            bus: self.inner.clone(),
            wildcard: true,
        }
    }

    /// A read-only stream of every emitted event, for the websocket hub
    /// and the SSE endpoint.
    pub fn subscribe_broadcast(&self) -> broadcast::Receiver<DomainEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Runs every matching handler for `event`, tolerating individual
    /// handler panics by catching unwind so one bad subscriber cannot
    /// silently drop the rest.
    pub fn emit(&self, event: DomainEvent) {
        let event_type = event.event_type();

        for (_, registered_type, handler) in self.inner.handlers.read().iter() {
            if *registered_type == event_type {
                if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&event))) {
                    tracing::error!(?e, event_type, "event handler panicked");
                }
            }
        }

        for (_, handler) in self.inner.any_handlers.read().iter() {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&event))) {
                tracing::error!(?e, event_type, "wildcard event handler panicked");
            }
        }

        // Broadcast channel has no subscribers until the hub/SSE endpoint
        // starts listening; a send error there just means nobody's home.
        let _ = self.inner.broadcast_tx.send(event);
    }
}

/// A point-in-time wrapper used only for tests and documentation examples;
/// production code stamps `created_at` on the originating `Insight`/`Action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timestamped<T> {
    pub at: DateTime<Utc>,
    pub value: T,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn sample_event() -> DomainEvent {
        DomainEvent::RemediationRequested { action_id: Uuid::nil() }
    }

    #[test]
    fn on_handler_only_fires_for_matching_event_type() {
        let bus = EventBus::new(16);
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = hits.clone();
        let _sub = bus.on("remediation.requested", move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(sample_event());
        bus.emit(DomainEvent::RemediationApproved { action_id: Uuid::nil() });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn on_any_fires_for_every_event() {
        let bus = EventBus::new(16);
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = hits.clone();
        let _sub = bus.on_any(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(sample_event());
        bus.emit(DomainEvent::RemediationApproved { action_id: Uuid::nil() });
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_future_delivery() {
        let bus = EventBus::new(16);
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = hits.clone();
        let sub = bus.on("remediation.requested", move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(sample_event());
        sub.unsubscribe();
        bus.emit(sample_event());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn broadcast_subscriber_receives_emitted_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe_broadcast();
        bus.emit(sample_event());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "remediation.requested");
    }
}
