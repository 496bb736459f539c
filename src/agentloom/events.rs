//! Event bus / hooks (C3): synchronous in-process pub/sub.
//!
//! A single `Subscriber::on_event` method fans out every event kind, rather
//! than splitting agent events and orchestration events across two handler
//! methods, since they share one `Event` family here (§4.3). Delivery is
//! synchronous and in registration order; a subscriber's error is logged and
//! does not block the remaining subscribers
//! (§4.3, §5 "Shared resources").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, RunId, ToolCallId, TurnId};

/// Classification of an entry in the durable event log (§3 "Event").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ToolCall,
    ToolResult,
    AssistantMessage,
    PlannerNote,
    Thinking,
    // Streaming-envelope-only kinds (§6.6); never persisted as ledger source
    // events, but published on the hook bus alongside the five above.
    RunStarted,
    RunCompleted,
    RunFailed,
    ToolCallScheduled,
    ToolResultReceived,
}

/// One append-only entry in the durable event log (§3).
///
/// Never mutated after being appended; `data` MUST be JSON-encodable per
/// §6.5's persistence contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
    #[serde(default)]
    pub labels: std::collections::HashMap<String, String>,
}

/// The streaming envelope wrapping an [`Event`] for hook-bus consumers (§6.6).
///
/// Consumers rely on `sequence_index` to order events within a turn and
/// across parent/child boundaries (see [`crate::composer::ChildTracker`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub agent_id: AgentId,
    pub run_id: RunId,
    pub turn_id: Option<TurnId>,
    pub sequence_index: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub data: serde_json::Value,
    /// Set when this event was produced by a nested agent-as-tool run (C9).
    pub parent_tool_call_id: Option<ToolCallId>,
}

impl RunEvent {
    pub fn new(agent_id: AgentId, run_id: RunId, kind: EventKind, data: serde_json::Value) -> Self {
        RunEvent {
            agent_id,
            run_id,
            turn_id: None,
            sequence_index: None,
            timestamp: Utc::now(),
            kind,
            data,
            parent_tool_call_id: None,
        }
    }

    pub fn with_turn(mut self, turn_id: TurnId) -> Self {
        self.turn_id = Some(turn_id);
        self
    }

    pub fn with_sequence_index(mut self, index: u64) -> Self {
        self.sequence_index = Some(index);
        self
    }

    pub fn with_parent_tool_call(mut self, id: ToolCallId) -> Self {
        self.parent_tool_call_id = Some(id);
        self
    }
}

/// A subscriber to the hook bus. Delivery is synchronous; a subscriber that
/// returns an error is logged and does not prevent delivery to the rest of
/// the registered subscribers.
pub trait Subscriber: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}

/// A live registration; dropping or calling [`Subscription::close`] removes
/// the subscriber from the bus.
pub struct Subscription {
    id: u64,
    bus: Arc<EventBusInner>,
}

impl Subscription {
    /// Remove this subscriber from the bus. Idempotent.
    pub fn close(self) {
        self.bus.remove(self.id);
    }
}

struct EventBusInner {
    subscribers: RwLock<Vec<(u64, Arc<dyn Subscriber>)>>,
    next_id: AtomicU64,
}

impl EventBusInner {
    fn remove(&self, id: u64) {
        let mut subs = self.subscribers.write().expect("event bus lock poisoned");
        subs.retain(|(sub_id, _)| *sub_id != id);
    }
}

/// Synchronous in-process fan-out for the five core event kinds plus the
/// streaming-only kinds (§4.3).
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            inner: Arc::new(EventBusInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a subscriber; delivery order matches registration order.
    pub fn register(&self, subscriber: Arc<dyn Subscriber>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscribers
            .write()
            .expect("event bus lock poisoned")
            .push((id, subscriber));
        Subscription {
            id,
            bus: Arc::clone(&self.inner),
        }
    }

    /// Deliver `event` to all subscribers, in registration order. Uses a read
    /// lock on the subscriber set, per §5's locking discipline; a panicking
    /// subscriber is caught and logged rather than poisoning delivery to the
    /// rest of the list.
    pub fn publish(&self, event: &RunEvent) {
        let subs = self.inner.subscribers.read().expect("event bus lock poisoned");
        for (id, subscriber) in subs.iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                subscriber.on_event(event);
            }));
            if let Err(_panic) = result {
                log::error!(
                    "event bus subscriber {} panicked while handling {:?}; continuing delivery",
                    id,
                    event.kind
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<EventKind>>);
    impl Subscriber for Recorder {
        fn on_event(&self, event: &RunEvent) {
            self.0.lock().unwrap().push(event.kind);
        }
    }

    struct Failing;
    impl Subscriber for Failing {
        fn on_event(&self, _event: &RunEvent) {
            panic!("boom");
        }
    }

    #[test]
    fn delivers_in_registration_order_and_survives_failures() {
        let bus = EventBus::new();
        let rec_a = Arc::new(Recorder(Mutex::new(Vec::new())));
        let rec_b = Arc::new(Recorder(Mutex::new(Vec::new())));
        let _sub_fail = bus.register(Arc::new(Failing));
        let _sub_a = bus.register(rec_a.clone());
        let _sub_b = bus.register(rec_b.clone());

        let event = RunEvent::new(
            AgentId::from("acme.chat"),
            RunId::new("r1"),
            EventKind::RunStarted,
            serde_json::json!({}),
        );
        bus.publish(&event);

        assert_eq!(rec_a.0.lock().unwrap().as_slice(), &[EventKind::RunStarted]);
        assert_eq!(rec_b.0.lock().unwrap().as_slice(), &[EventKind::RunStarted]);
    }

    #[test]
    fn closed_subscription_stops_receiving() {
        let bus = EventBus::new();
        let rec = Arc::new(Recorder(Mutex::new(Vec::new())));
        let sub = bus.register(rec.clone());
        sub.close();

        bus.publish(&RunEvent::new(
            AgentId::from("a"),
            RunId::new("r"),
            EventKind::RunCompleted,
            serde_json::json!({}),
        ));
        assert!(rec.0.lock().unwrap().is_empty());
    }
}
