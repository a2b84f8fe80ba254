//! The live-update fan-out bus.
//!
//! Grounded in the teacher's `api::websocket` broadcast-subscribe-and-forward
//! idiom, but swapped from a lossy `broadcast` channel to one bounded `mpsc`
//! queue per subscriber so a slow subscriber drops its own messages instead
//! of forcing every subscriber onto the same lag semantics.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, trace};

use crate::stats;
use crate::store::Store;

/// Messages ready to hand to a transport; already serialized once so every
/// subscriber gets the identical bytes regardless of fan-out width.
pub type Frame = String;

pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;
const DEBOUNCE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Connected,
    MonitorUpdate,
    MonitorAdded,
    MonitorDeleted,
    StatsUpdate,
}

impl EventKind {
    fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::MonitorUpdate => "monitor_update",
            EventKind::MonitorAdded => "monitor_added",
            EventKind::MonitorDeleted => "monitor_deleted",
            EventKind::StatsUpdate => "stats_update",
        }
    }
}

fn frame(kind: EventKind, data: Value) -> Frame {
    serde_json::json!({ "type": kind.as_str(), "data": data }).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct StatsSnapshot {
    overall_uptime: f64,
    services_up: i64,
    services_down: i64,
    avg_response_time_ms: f64,
}

impl StatsSnapshot {
    fn from(s: &stats::FleetStats) -> Self {
        Self {
            overall_uptime: s.overall_uptime,
            services_up: s.services_up,
            services_down: s.services_down,
            avg_response_time_ms: s.avg_response_time_ms,
        }
    }
}

struct Inner {
    subscribers: HashMap<u64, mpsc::Sender<Frame>>,
    last_stats: Option<StatsSnapshot>,
}

/// A live handle to one subscriber's inbound queue.
pub struct Subscription {
    id: u64,
    pub receiver: mpsc::Receiver<Frame>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

pub struct EventBus {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    /// Bumped on every debounce request; a pending timer checks this after
    /// sleeping and no-ops if it no longer holds the latest generation.
    debounce_generation: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                subscribers: HashMap::new(),
                last_stats: None,
            }),
            next_id: AtomicU64::new(1),
            debounce_generation: AtomicU64::new(0),
        }
    }

    /// Registers a new subscriber and immediately enqueues a `connected`
    /// frame for it.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let _ = tx.try_send(frame(EventKind::Connected, Value::Null));
        self.inner.lock().unwrap().subscribers.insert(id, tx);
        debug!(subscriber_id = id, "subscriber connected");
        Subscription { id, receiver: rx }
    }

    /// Idempotent; safe to call more than once for the same subscription.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.unsubscribe_id(subscription.id);
    }

    /// Same as `unsubscribe`, addressed by id; used when only the id
    /// survives (e.g. a stream wrapper's `Drop` impl).
    pub fn unsubscribe_id(&self, id: u64) {
        self.inner.lock().unwrap().subscribers.remove(&id);
        debug!(subscriber_id = id, "subscriber disconnected");
    }

    /// Serializes the envelope once and attempts a non-blocking enqueue per
    /// subscriber. A full queue drops the message for that subscriber only.
    pub fn publish(&self, kind: EventKind, data: Value) {
        let payload = frame(kind, data);
        let inner = self.inner.lock().unwrap();
        for (id, tx) in inner.subscribers.iter() {
            if tx.try_send(payload.clone()).is_err() {
                trace!(subscriber_id = id, kind = kind.as_str(), "dropped frame for full queue");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }

    /// Resets a 500ms trailing-edge timer; on fire, recomputes fleet stats
    /// and publishes `stats_update` only if something actually changed.
    pub fn publish_stats_debounced(self: &std::sync::Arc<Self>, store: &Store) {
        let generation = self.debounce_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let bus = std::sync::Arc::clone(self);
        let store = store.clone();
        tokio::spawn(async move {
            sleep(DEBOUNCE_DELAY).await;
            if bus.debounce_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            let now = chrono::Utc::now();
            let computed = match stats::fleet_stats(&store, now).await {
                Ok(s) => s,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to recompute fleet stats for debounce");
                    return;
                }
            };
            let snapshot = StatsSnapshot::from(&computed);
            let mut inner = bus.inner.lock().unwrap();
            if inner.last_stats == Some(snapshot) {
                return;
            }
            inner.last_stats = Some(snapshot);
            drop(inner);
            bus.publish(
                EventKind::StatsUpdate,
                serde_json::json!({
                    "overallUptime": computed.overall_uptime,
                    "servicesUp": computed.services_up,
                    "servicesDown": computed.services_down,
                    "avgResponseTime": computed.avg_response_time_ms,
                }),
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_enqueues_connected_frame() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let frame = sub.receiver.try_recv().unwrap();
        assert!(frame.contains("\"connected\""));
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        bus.unsubscribe(&sub);
        bus.unsubscribe(&sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn full_queue_drops_without_disconnecting() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        sub.receiver.try_recv().unwrap(); // drain the connected frame

        for i in 0..SUBSCRIBER_QUEUE_CAPACITY + 10 {
            bus.publish(EventKind::MonitorUpdate, serde_json::json!({ "i": i }));
        }

        assert_eq!(bus.subscriber_count(), 1);
        let mut received = 0;
        while sub.receiver.try_recv().is_ok() {
            received += 1;
        }
        assert!(received <= SUBSCRIBER_QUEUE_CAPACITY);
        assert!(received > 0);
    }

    #[test]
    fn other_subscribers_unaffected_by_one_full_queue() {
        let bus = EventBus::new();
        let mut slow = bus.subscribe();
        let mut fast = bus.subscribe();
        slow.receiver.try_recv().unwrap();
        fast.receiver.try_recv().unwrap();

        for i in 0..SUBSCRIBER_QUEUE_CAPACITY + 5 {
            bus.publish(EventKind::MonitorUpdate, serde_json::json!({ "i": i }));
        }

        assert!(fast.receiver.try_recv().is_ok());
        assert_eq!(bus.subscriber_count(), 2);
    }
}
