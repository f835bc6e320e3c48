//! Bridge that maps state events onto a broadcast channel.
//!
//! The [`BroadcastStateBridge`] lives at the boundary between the engine and
//! remote observers. Out-of-process bridges (MQTT, a web UI socket, a display
//! daemon) subscribe to the channel instead of registering listeners.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::listener::StateListener;
use super::StateEvent;

/// Bridges state events to a `tokio::sync::broadcast` channel.
///
/// Slow subscribers lag and lose the oldest events rather than slowing the
/// watcher down; they can always resynchronise from a store snapshot.
#[derive(Clone)]
pub struct BroadcastStateBridge {
    tx: broadcast::Sender<StateEvent>,
}

impl BroadcastStateBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event to every current subscriber.
    pub fn publish(&self, event: StateEvent) {
        if let Err(e) = self.tx.send(event) {
            log::trace!("[StateBridge] No broadcast receivers: {}", e);
        }
    }
}

#[async_trait]
impl StateListener for BroadcastStateBridge {
    async fn on_state_changed(&self, event: StateEvent) {
        self.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bridge = BroadcastStateBridge::new(8);
        let mut rx = bridge.subscribe();
        bridge.publish(StateEvent {
            key: "systemstate".into(),
            leaf: "cputemp".into(),
            value: json!(48),
            changed: vec!["cputemp".into()],
            timestamp: 1,
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.key, "systemstate");
        assert_eq!(received.value, json!(48));
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let bridge = BroadcastStateBridge::new(8);
        bridge.publish(StateEvent {
            key: "player".into(),
            leaf: "player".into(),
            value: json!({}),
            changed: vec![],
            timestamp: 1,
        });
    }
}
