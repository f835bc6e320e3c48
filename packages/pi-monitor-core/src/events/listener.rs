//! Listener abstraction for decoupling state observers from the watcher.
//!
//! Observers depend on the [`StateListener`] trait rather than on the watcher
//! loop, so a display driver, a relay and a test recorder plug in the same way.

use async_trait::async_trait;

use super::StateEvent;

/// Handle returned on registration, used to deregister a listener later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Trait for components that react to state changes.
///
/// Each invocation runs on its own task, so a slow listener never delays
/// delivery to the others. Implementations must not assume any ordering
/// relative to other listeners.
///
/// # Example
///
/// ```ignore
/// watcher.register_listener(
///     Arc::new(|event: StateEvent| log::info!("{} changed", event.key)),
///     Some("player"),
/// );
/// ```
#[async_trait]
pub trait StateListener: Send + Sync {
    /// Called once per delivered state change.
    async fn on_state_changed(&self, event: StateEvent);
}

#[async_trait]
impl<F> StateListener for F
where
    F: Fn(StateEvent) + Send + Sync,
{
    async fn on_state_changed(&self, event: StateEvent) {
        self(event)
    }
}

/// Logging listener for debugging and development.
///
/// Logs all events at debug level. Registered by the daemon when
/// `ENABLE_DEBUG` is set.
pub struct LoggingListener;

#[async_trait]
impl StateListener for LoggingListener {
    async fn on_state_changed(&self, event: StateEvent) {
        tracing::debug!(key = %event.key, leaf = %event.leaf, value = %event.value, "state_changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Test listener that counts events.
    struct CountingListener {
        count: AtomicUsize,
    }

    #[async_trait]
    impl StateListener for CountingListener {
        async fn on_state_changed(&self, _event: StateEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn event() -> StateEvent {
        StateEvent {
            key: "player".into(),
            leaf: "power".into(),
            value: json!(true),
            changed: vec!["power".into()],
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn counting_listener_tracks_events() {
        let listener = Arc::new(CountingListener {
            count: AtomicUsize::new(0),
        });
        listener.on_state_changed(event()).await;
        listener.on_state_changed(event()).await;
        assert_eq!(listener.count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closures_are_listeners() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let listener: Arc<dyn StateListener> = Arc::new(move |e: StateEvent| {
            assert_eq!(e.leaf, "power");
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });
        listener.on_state_changed(event()).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
