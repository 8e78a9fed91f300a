//! In-process publish/subscribe. Fire-and-forget: publishing with no
//! subscribers is not an error, and slow subscribers that lag the channel
//! simply miss events.

use serde_json::Value;
use tokio::sync::broadcast;

pub const TOPIC_RESPONSE_COMPLETE: &str = "response:complete";
pub const TOPIC_SSE: &str = "sse";

#[derive(Debug, Clone)]
pub struct BusEvent {
    pub topic: String,
    pub payload: Value,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn publish(&self, topic: &str, payload: Value) {
        let _ = self.tx.send(BusEvent {
            topic: topic.to_string(),
            payload,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(TOPIC_RESPONSE_COMPLETE, json!({"thread_id": 1}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, TOPIC_RESPONSE_COMPLETE);
        assert_eq!(event.payload["thread_id"], 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(TOPIC_SSE, json!({"type": "x"}));
    }

    #[tokio::test]
    async fn each_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(TOPIC_SSE, json!({"n": 1}));
        bus.publish(TOPIC_SSE, json!({"n": 2}));

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap().payload["n"], 1);
            assert_eq!(rx.recv().await.unwrap().payload["n"], 2);
        }
    }
}
