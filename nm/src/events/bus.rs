//! Event bus - tokio broadcast channel with a typed event enum

use tokio::sync::broadcast;
use tracing::debug;

use super::types::Event;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4_096;

/// Central event bus for one agent session
///
/// Cheap to clone; all clones share the channel. Emission is
/// fire-and-forget: with no subscribers the event is dropped, and a full
/// channel drops the oldest events for lagging subscribers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: Event) {
        debug!(event_type = event.event_type(), "bus emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::with_default_capacity();
        let mut rx = bus.subscribe();

        bus.emit(Event::TurnStarted);

        match rx.recv().await.unwrap() {
            Event::TurnStarted => {}
            other => panic!("unexpected event: {}", other.event_type()),
        }
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::with_default_capacity();
        bus.emit(Event::TurnStarted);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_all_subscribers_see_every_event() {
        let bus = EventBus::with_default_capacity();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(Event::InjectionQueued {
            source: "test".to_string(),
        });

        assert_eq!(a.recv().await.unwrap().event_type(), "injection-queued");
        assert_eq!(b.recv().await.unwrap().event_type(), "injection-queued");
    }
}
