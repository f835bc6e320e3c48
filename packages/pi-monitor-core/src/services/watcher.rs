//! State change fan-out.
//!
//! The watcher owns the receiving end of the store's change channel. For
//! every event it first runs the built-in policies inline and in order
//! (arbitration for player backends, then the volume limiter), then
//! publishes the event on the broadcast bridge, then hands it to every
//! matching external listener on its own worker.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use super::{PlayerArbiter, VolumeLimiter};
use crate::constants::{LOOP_IDLE_TIMEOUT, PLAYER_KEY, STATE_BROADCAST_CAPACITY};
use crate::events::{BroadcastStateBridge, ListenerId, StateEvent, StateListener};
use crate::runtime::{panic_message, TaskSpawner, TokioSpawner};
use crate::store::StateStore;

struct Registration {
    id: ListenerId,
    filter: Option<String>,
    listener: Arc<dyn StateListener>,
}

/// Fans state changes out to policies and listeners.
pub struct StateWatcher {
    state: Arc<StateStore>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<StateEvent>>>,
    listeners: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
    bridge: BroadcastStateBridge,
    arbiter: Arc<PlayerArbiter>,
    limiter: Arc<VolumeLimiter>,
}

impl StateWatcher {
    pub fn new(
        state: Arc<StateStore>,
        events: mpsc::UnboundedReceiver<StateEvent>,
        arbiter: Arc<PlayerArbiter>,
        limiter: Arc<VolumeLimiter>,
    ) -> Self {
        Self {
            state,
            rx: Mutex::new(Some(events)),
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            bridge: BroadcastStateBridge::new(STATE_BROADCAST_CAPACITY),
            arbiter,
            limiter,
        }
    }

    /// Registers a listener. With a filter, only events whose top-level key
    /// equals the filter are delivered.
    pub fn register_listener(
        &self,
        listener: Arc<dyn StateListener>,
        filter: Option<&str>,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push(Registration {
            id,
            filter: filter.map(str::to_string),
            listener,
        });
        log::debug!(
            "[StateWatcher] Registered listener {:?} for {}",
            id,
            filter.unwrap_or("all keys")
        );
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn deregister_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        before != listeners.len()
    }

    /// Number of registered external listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Subscribes to every state event (for remote bridges).
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.bridge.subscribe()
    }

    /// Spawns the event loop. Only the first call has any effect.
    pub fn start(self: &Arc<Self>, spawner: TokioSpawner, workers: usize, cancel: CancellationToken) {
        let Some(mut rx) = self.rx.lock().take() else {
            log::warn!("[StateWatcher] Already started");
            return;
        };
        let watcher = Arc::clone(self);
        let workers = Arc::new(Semaphore::new(workers.max(1)));
        let loop_spawner = spawner.clone();

        loop_spawner.spawn(async move {
            log::debug!("[StateWatcher] Event loop started");
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = tokio::time::timeout(LOOP_IDLE_TIMEOUT, rx.recv()) => match received {
                        Ok(Some(event)) => event,
                        Ok(None) => break,
                        Err(_) => {
                            log::trace!("[StateWatcher] Idle wake");
                            continue;
                        }
                    },
                };

                let mut next = Some(event);
                while let Some(event) = next.take() {
                    watcher.run_policies(&event);
                    watcher.bridge.publish(event.clone());
                    if !watcher.fan_out(&event, &spawner, &workers, &cancel).await {
                        break;
                    }
                    next = rx.try_recv().ok();
                }
                if cancel.is_cancelled() {
                    break;
                }
            }
            log::debug!("[StateWatcher] Event loop stopped");
        });
    }

    /// Runs the built-in policies for one event.
    fn run_policies(&self, event: &StateEvent) {
        if self
            .state
            .get_str_list(&format!("{}.players", PLAYER_KEY))
            .iter()
            .any(|p| *p == event.key)
        {
            let result = catch_unwind(AssertUnwindSafe(|| self.arbiter.on_player_event(event)));
            if let Err(panic) = result {
                log::error!(
                    "[StateWatcher] Arbitration panicked on {}: {}",
                    event.key,
                    panic_message(&panic)
                );
            }
        }

        if event.key == PLAYER_KEY && event.touches("volume_level") {
            let result = catch_unwind(AssertUnwindSafe(|| self.limiter.check()));
            if let Err(panic) = result {
                log::error!(
                    "[StateWatcher] Volume limiter panicked: {}",
                    panic_message(&panic)
                );
            }
        }
    }

    /// Delivers one event to every matching listener, in registration order,
    /// each on its own worker. Returns false if cancelled while waiting for
    /// a worker.
    async fn fan_out(
        &self,
        event: &StateEvent,
        spawner: &TokioSpawner,
        workers: &Arc<Semaphore>,
        cancel: &CancellationToken,
    ) -> bool {
        let targets: Vec<Arc<dyn StateListener>> = self
            .listeners
            .read()
            .iter()
            .filter(|r| r.filter.as_deref().map_or(true, |f| f == event.key))
            .map(|r| Arc::clone(&r.listener))
            .collect();

        for listener in targets {
            let permit = tokio::select! {
                _ = cancel.cancelled() => None,
                permit = Arc::clone(workers).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                return false;
            };
            let event = event.clone();
            let label = format!("listener for {}", event.key);
            spawner.spawn_guarded(label, async move {
                listener.on_state_changed(event).await;
                drop(permit);
            });
        }
        true
    }
}
