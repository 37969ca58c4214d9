//! Broadcast channel distributing `BusEvent` to multiple listeners.
//!
//! Publishing with no active listener is a no-op; a slow listener lags
//! instead of blocking the bus.

use botcomm_types::event::BusEvent;
use tokio::sync::broadcast;

/// Multi-consumer channel for bus lifecycle and delivery events.
///
/// Cloning the bus clones the sender, so every clone publishes into the
/// same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a listener that receives all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current listeners. Returns how many
    /// listeners it reached.
    pub fn publish(&self, event: BusEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered(id: &str) -> BusEvent {
        BusEvent::BotRegistered {
            bot_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn publish_and_subscribe_delivers_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(registered("bot-a"));

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, BusEvent::BotRegistered { ref bot_id } if bot_id == "bot-a"));
    }

    #[tokio::test]
    async fn multiple_listeners_each_receive_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.listener_count(), 2);

        assert_eq!(bus.publish(BusEvent::HistoryPersisted { entries: 3 }), 2);

        assert!(matches!(rx1.recv().await.unwrap(), BusEvent::HistoryPersisted { entries: 3 }));
        assert!(matches!(rx2.recv().await.unwrap(), BusEvent::HistoryPersisted { entries: 3 }));
    }

    #[test]
    fn publish_without_listeners_is_noop() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish(registered("a")), 0);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn lagged_listener_reports_lag() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        for i in 0..10 {
            bus.publish(registered(&format!("bot-{i}")));
        }

        match rx.try_recv() {
            Err(broadcast::error::TryRecvError::Lagged(n)) => assert!(n > 0),
            other => panic!("expected lag, got {other:?}"),
        }
    }

    #[test]
    fn clone_shares_channel() {
        let bus = EventBus::new(16);
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.publish(registered("a"));
        assert!(rx.try_recv().is_ok());
        assert!(format!("{bus:?}").contains("receiver_count"));
    }
}
