use botvisor_core::BotEvent;
use tokio::sync::broadcast;
use tracing::trace;

/// Fan-out of supervisor events to every connected client.
///
/// Publishing never blocks. A subscriber that falls more than `capacity`
/// events behind is told how many it missed instead of losing them silently.
#[derive(Clone, Debug)]
pub struct EventHub {
    tx: broadcast::Sender<BotEvent>,
}

/// What a subscriber receives next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Event(BotEvent),
    /// The subscriber lagged and this many events were skipped
    Missed(u64),
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: BotEvent) {
        // Err only means nobody is listening right now
        if let Err(broadcast::error::SendError(event)) = self.tx.send(event) {
            trace!("No subscribers for event from bot {}", event.name());
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One client's view of the hub
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<BotEvent>,
}

impl Subscription {
    /// Next delivery, or `None` once the hub is gone
    pub async fn recv(&mut self) -> Option<Delivery> {
        match self.rx.recv().await {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::RecvError::Lagged(n)) => Some(Delivery::Missed(n)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(name: &str, text: &str) -> BotEvent {
        BotEvent::Output {
            name: name.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let hub = EventHub::new(16);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish(output("alpha", "one"));
        hub.publish(output("alpha", "two"));

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.recv().await, Some(Delivery::Event(output("alpha", "one"))));
            assert_eq!(sub.recv().await, Some(Delivery::Event(output("alpha", "two"))));
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let hub = EventHub::new(4);
        hub.publish(output("alpha", "nobody listens"));

        // Late subscribers only see what comes after they joined
        let mut late = hub.subscribe();
        hub.publish(output("alpha", "hello"));
        assert_eq!(late.recv().await, Some(Delivery::Event(output("alpha", "hello"))));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_told_what_it_missed() {
        let hub = EventHub::new(2);
        let mut sub = hub.subscribe();
        for i in 0..5 {
            hub.publish(output("alpha", &i.to_string()));
        }
        assert_eq!(sub.recv().await, Some(Delivery::Missed(3)));
        assert_eq!(sub.recv().await, Some(Delivery::Event(output("alpha", "3"))));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_affect_others() {
        let hub = EventHub::new(4);
        let dropped = hub.subscribe();
        let mut kept = hub.subscribe();
        drop(dropped);
        hub.publish(output("alpha", "still here"));
        assert_eq!(kept.recv().await, Some(Delivery::Event(output("alpha", "still here"))));
        assert_eq!(hub.subscriber_count(), 1);
    }
}
