//! Player arbitration.
//!
//! Decides which backend owns the speakers. Evaluated by the state watcher,
//! sequentially, for every change in the namespace of a registered player
//! backend. Rules, in order:
//!
//! 1. Takeover: a backend that starts playing while not current becomes
//!    current, and every other playing backend is stopped.
//! 2. Interrupt entry: a notification, alert or voice-assistant state saves
//!    the interrupted backend and its volume, then applies the interrupt
//!    volume.
//! 3. Interrupt exit: the interrupter going idle (or clearing its state)
//!    restores the saved volume when one was known, resumes the saved backend if it was playing, and makes it current.
//! 4. Mirror: the current backend's metadata is copied onto `player`.
//! 5. Auto power-on: playback while powered off submits `power poweron`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::bus::CommandBus;
use crate::config::{ConfigStore, Settings};
use crate::constants::PLAYER_KEY;
use crate::events::StateEvent;
use crate::player::{PlaybackState, PlayerMetadata};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::store::StateStore;

/// What an interrupt displaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedPlayback {
    /// Backend that was current when the interrupt began.
    pub backend: Option<String>,
    /// Its playback state at that moment.
    pub state: PlaybackState,
    /// Aggregate volume at that moment, `None` if nothing had reported one.
    pub volume: Option<u8>,
}

/// Arbitration state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Arbitration {
    #[default]
    NoActive,
    Active { backend: String },
    Interrupted {
        interrupter: String,
        saved: SavedPlayback,
    },
}

impl Arbitration {
    /// Backend currently holding the output, if any.
    #[must_use]
    pub fn current(&self) -> Option<&str> {
        match self {
            Self::NoActive => None,
            Self::Active { backend } => Some(backend),
            Self::Interrupted { interrupter, .. } => Some(interrupter),
        }
    }

    fn is_interrupter(&self, backend: &str) -> bool {
        matches!(self, Self::Interrupted { interrupter, .. } if interrupter == backend)
    }
}

/// The arbitration state machine.
pub struct PlayerArbiter {
    state: Arc<StateStore>,
    config: Arc<ConfigStore>,
    bus: CommandBus,
    spawner: TokioSpawner,
    machine: Mutex<Arbitration>,
}

impl PlayerArbiter {
    pub fn new(
        state: Arc<StateStore>,
        config: Arc<ConfigStore>,
        bus: CommandBus,
        spawner: TokioSpawner,
    ) -> Self {
        Self {
            state,
            config,
            bus,
            spawner,
            machine: Mutex::new(Arbitration::NoActive),
        }
    }

    /// Returns a copy of the current arbitration state.
    #[must_use]
    pub fn snapshot(&self) -> Arbitration {
        self.machine.lock().clone()
    }

    /// Evaluates one change in the namespace of player backend `event.key`.
    pub fn on_player_event(&self, event: &StateEvent) {
        let backend = event.key.as_str();
        let metadata = PlayerMetadata::from_value(&self.state.get(backend));
        let incoming = metadata.state;
        let settings = self.config.settings();

        let mut machine = self.machine.lock();
        let previous_current = machine.current().map(str::to_string);

        if incoming.is_playing() && previous_current.as_deref() != Some(backend) {
            self.take_over(&mut machine, backend, incoming, &settings);
        } else if incoming.is_interrupt() && !machine.is_interrupter(backend) {
            self.enter_interrupt(&mut machine, backend, &settings);
        }

        if machine.is_interrupter(backend) && incoming.releases_output() {
            self.exit_interrupt(&mut machine);
        }

        let current = machine.current().map(str::to_string);
        drop(machine);

        if current != previous_current {
            let name = current.clone().unwrap_or_default();
            log::info!("[Arbiter] Current player: {}", display(&name));
            self.state
                .set(&format!("{}.current_player", PLAYER_KEY), name);
        }

        match current.as_deref() {
            Some(c) if c == backend => self.mirror(c, &metadata),
            Some(c) if current != previous_current => {
                let metadata = PlayerMetadata::from_value(&self.state.get(c));
                self.mirror(c, &metadata);
            }
            _ => {}
        }
    }

    fn take_over(
        &self,
        machine: &mut Arbitration,
        backend: &str,
        incoming: PlaybackState,
        settings: &Settings,
    ) {
        let mut outgoing_playing = false;
        for other in self.state.get_str_list(&format!("{}.players", PLAYER_KEY)) {
            if other == backend {
                continue;
            }
            let other_state = PlaybackState::from_value(&self.state.get(&format!("{}.state", other)));
            if other_state.is_playing() {
                log::info!("[Arbiter] {} takes over from {}", backend, other);
                outgoing_playing = true;
                self.bus.submit(&other, "stop", Value::Null);
            }
        }

        if incoming.is_interrupt() {
            self.enter_interrupt(machine, backend, settings);
            return;
        }

        if let Arbitration::Interrupted { interrupter, saved } = &*machine {
            log::info!(
                "[Arbiter] {} supersedes interruption by {}",
                backend,
                interrupter
            );
            if let Some(volume) = saved.volume {
                self.bus.submit(PLAYER_KEY, "volume_set", volume);
            }
            self.state
                .set(&format!("{}.interrupted_player", PLAYER_KEY), "");
        }
        *machine = Arbitration::Active {
            backend: backend.to_string(),
        };

        if outgoing_playing && settings.flush_on_takeover {
            self.flush(backend, Duration::from_millis(settings.flush_delay_ms));
        }
    }

    fn enter_interrupt(&self, machine: &mut Arbitration, backend: &str, settings: &Settings) {
        if let Arbitration::Interrupted { interrupter, saved } = &*machine {
            log::info!(
                "[Arbiter] {} interrupts {} (nested)",
                backend,
                display(interrupter)
            );
            *machine = Arbitration::Interrupted {
                interrupter: backend.to_string(),
                saved: saved.clone(),
            };
            return;
        }

        let saved_backend = machine.current().map(str::to_string);
        let saved_state = saved_backend
            .as_deref()
            .map(|b| PlaybackState::from_value(&self.state.get(&format!("{}.state", b))))
            .unwrap_or_default();
        let saved_volume = self
            .state
            .get_as::<f64>(&format!("{}.volume_level", PLAYER_KEY))
            .map(|v| v.clamp(0.0, 100.0) as u8);

        let incoming =
            PlaybackState::from_value(&self.state.get(&format!("{}.state", backend)));
        let interrupt_volume = if incoming == PlaybackState::Alerting {
            settings.alert_volume
        } else {
            settings.notify_volume
        };
        log::info!(
            "[Arbiter] {} interrupts {} (saved volume {:?})",
            backend,
            display(saved_backend.as_deref().unwrap_or_default()),
            saved_volume
        );
        if interrupt_volume > 0 {
            self.bus.submit(PLAYER_KEY, "volume_set", interrupt_volume);
        }
        self.state.set(
            &format!("{}.interrupted_player", PLAYER_KEY),
            saved_backend.clone().unwrap_or_default(),
        );

        *machine = Arbitration::Interrupted {
            interrupter: backend.to_string(),
            saved: SavedPlayback {
                backend: saved_backend,
                state: saved_state,
                volume: saved_volume,
            },
        };
    }

    fn exit_interrupt(&self, machine: &mut Arbitration) {
        let Arbitration::Interrupted { interrupter, saved } = std::mem::take(machine) else {
            return;
        };
        log::info!(
            "[Arbiter] Interruption by {} finished, restoring {}",
            interrupter,
            display(saved.backend.as_deref().unwrap_or_default())
        );

        match saved.volume {
            Some(volume) => self.bus.submit(PLAYER_KEY, "volume_set", volume),
            None => log::debug!("[Arbiter] No volume was known before the interruption"),
        }
        self.state
            .set(&format!("{}.interrupted_player", PLAYER_KEY), "");

        *machine = match saved.backend {
            Some(backend) => {
                if saved.state.is_playing() {
                    self.bus.submit(&backend, "play", Value::Null);
                }
                Arbitration::Active { backend }
            }
            None => Arbitration::NoActive,
        };
    }

    /// Copies backend metadata onto the aggregate node in one write.
    ///
    /// The aggregate volume is only overwritten by backends that publish
    /// their own `volume_level`.
    fn mirror(&self, backend: &str, metadata: &PlayerMetadata) {
        let mut fields = metadata.to_map();
        if self.state.get(&format!("{}.volume_level", backend)).is_null() {
            fields.remove("volume_level");
        }
        self.state.update(PLAYER_KEY, fields);

        let powered = self.state.get_bool(&format!("{}.power", PLAYER_KEY));
        if !powered && metadata.state.is_playing() {
            log::info!("[Arbiter] Playback started while powered off, powering on");
            self.bus.submit("power", "poweron", Value::Null);
        }
    }

    /// Cycles the incoming backend through pause/play so it re-acquires a
    /// sink the outgoing backend may still hold.
    fn flush(&self, backend: &str, delay: Duration) {
        let bus = self.bus.clone();
        let backend = backend.to_string();
        self.spawner
            .spawn_guarded(format!("flush {}", backend), async move {
                bus.submit(&backend, "pause", Value::Null);
                tokio::time::sleep(delay).await;
                bus.submit(&backend, "play", Value::Null);
            });
    }
}

fn display(name: &str) -> &str {
    if name.is_empty() {
        "nothing"
    } else {
        name
    }
}
