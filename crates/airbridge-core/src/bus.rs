//! In-process publish/subscribe event bus.
//!
//! Each subscription owns an unbounded queue, so `publish` never blocks the
//! caller and a subscriber consumes its events strictly in publish order.
//! Subscriptions can filter on event topics and optionally on a device id;
//! dropping the [`Subscription`] unsubscribes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::trace;

use crate::device::DeviceId;
use crate::events::{Event, EventType};

struct Subscriber {
    id: u64,
    types: HashSet<EventType>,
    device: Option<DeviceId>,
    tx: mpsc::UnboundedSender<Event>,
}

impl Subscriber {
    fn matches(&self, event: &Event) -> bool {
        if !self.types.contains(&event.event_type()) {
            return false;
        }
        match (&self.device, &event.device_id) {
            (Some(want), Some(got)) => want == got,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// The bus. One instance is shared (via `Arc`) by every component.
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        })
    }

    /// Subscribe to the given topics, optionally filtered to one device.
    pub fn subscribe(&self, types: &[EventType], device: Option<DeviceId>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sub = Subscriber {
            id,
            types: types.iter().copied().collect(),
            device,
            tx,
        };
        self.subscribers.lock().unwrap().push(sub);
        Subscription {
            registry: Arc::clone(&self.subscribers),
            id,
            rx,
        }
    }

    /// Publish an event. Never blocks; dead subscribers are pruned.
    pub fn publish(&self, event: Event) {
        trace!(event = ?event.event_type(), device = ?event.device_id, "publish");
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|sub| {
            if sub.matches(&event) {
                sub.tx.send(event.clone()).is_ok()
            } else {
                true
            }
        });
    }

    /// Number of live subscriptions (for tests and diagnostics).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

/// A live subscription. Receive with [`Subscription::recv`]; drop to
/// unsubscribe.
pub struct Subscription {
    registry: Arc<Mutex<Vec<Subscriber>>>,
    id: u64,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    /// Wait for the next matching event. Returns `None` once the bus has
    /// dropped this subscriber (shutdown).
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for synchronous drains in tests.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.lock().unwrap().retain(|s| s.id != self.id);
    }
}
