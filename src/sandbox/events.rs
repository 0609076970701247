//! Live Event Bus (C5).
//!
//! Per-instance fan-out, synchronous and best-effort: a slow or vanished
//! subscriber never blocks or drops delivery to the others, and there is no
//! replay buffer — a subscriber only observes events emitted after it
//! subscribed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::sandbox::types::LiveEvent;

pub struct Subscription {
    id: u64,
    pub receiver: mpsc::UnboundedReceiver<LiveEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, mpsc::UnboundedSender<LiveEvent>)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push((id, tx));
        Subscription { id, receiver: rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().unwrap().retain(|(sid, _)| *sid != id);
    }

    /// Deliver `event` to every current subscriber. A subscriber whose
    /// channel is closed is pruned rather than treated as an error — one
    /// dead receiver must not affect delivery to the others.
    pub fn emit(&self, event: LiveEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::types::EventCategory;

    #[test]
    fn subscribers_only_see_events_after_subscribing() {
        let bus = EventBus::new();
        bus.emit(LiveEvent::new(EventCategory::Status, "running"));

        let mut sub = bus.subscribe();
        bus.emit(LiveEvent::new(EventCategory::Status, "stopped"));

        let received = sub.receiver.try_recv().unwrap();
        assert_eq!(received.message, "stopped");
        assert!(sub.receiver.try_recv().is_err());
    }

    #[test]
    fn dead_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let dead = bus.subscribe();
        drop(dead);
        let mut alive = bus.subscribe();

        bus.emit(LiveEvent::new(EventCategory::Status, "running"));
        assert!(alive.receiver.try_recv().is_ok());
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        bus.unsubscribe(sub.id());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
