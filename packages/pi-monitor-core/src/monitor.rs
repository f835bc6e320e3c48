//! The orchestrator.
//!
//! [`Monitor`] owns the engine's parts and is the single command handler
//! behind the bus. It implements the built-in `player`, `power` and `system`
//! targets and passes every other target through to the named module.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::bus::{Command, CommandBus, CommandDispatcher, CommandHandler};
use crate::config::ConfigStore;
use crate::constants::{
    DEFAULT_COMMAND_WORKERS, DEFAULT_LISTENER_WORKERS, DEFAULT_SHUTDOWN_JOIN_TIMEOUT, MODULES_KEY,
    PLAYER_KEY,
};
use crate::context::Clock;
use crate::error::{MonitorError, MonitorResult};
use crate::lifecycle::Lifecycle;
use crate::modules::ModuleRegistry;
use crate::player::{aggregate_player_node, PlaybackState, PlayerMetadata};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::services::{volume_ceiling, PlayerArbiter, StateWatcher};
use crate::store::StateStore;
use crate::utils::{payload_truthy, payload_volume};

/// Runtime sizing for the engine.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Maximum commands executing at once.
    pub command_workers: usize,
    /// Maximum listener callbacks executing at once.
    pub listener_workers: usize,
    /// How long shutdown waits for in-flight workers.
    pub shutdown_timeout: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            command_workers: DEFAULT_COMMAND_WORKERS,
            listener_workers: DEFAULT_LISTENER_WORKERS,
            shutdown_timeout: DEFAULT_SHUTDOWN_JOIN_TIMEOUT,
        }
    }
}

/// Normalises a `player` verb alias.
///
/// `toggle` aliases resolve against `state`: pause while playing, play
/// otherwise.
#[must_use]
pub fn normalize_player_verb(verb: &str, state: PlaybackState) -> String {
    let verb = verb.trim().to_ascii_lowercase();
    match verb.as_str() {
        "next" | "nexttrack" | "next_track" => "next".into(),
        "previous" | "prev" | "previous_track" | "previoustrack" => "previous".into(),
        "toggle" | "toggleplaypause" | "toggleplay" | "togglepause" => {
            if state.is_playing() {
                "pause".into()
            } else {
                "play".into()
            }
        }
        "volup" | "volumeup" | "volume_up" => "volume_up".into(),
        "voldown" | "volumedown" | "volume_down" => "volume_down".into(),
        "volume" | "setvolume" | "volume_set" | "set_volume" => "volume_set".into(),
        "play_sound" => "play_notification".into(),
        _ => verb,
    }
}

/// The orchestration engine.
pub struct Monitor {
    state: Arc<StateStore>,
    config: Arc<ConfigStore>,
    bus: CommandBus,
    dispatcher: CommandDispatcher,
    registry: Arc<ModuleRegistry>,
    watcher: Arc<StateWatcher>,
    arbiter: Arc<PlayerArbiter>,
    clock: Arc<dyn Clock>,
    lifecycle: Arc<dyn Lifecycle>,
    spawner: TokioSpawner,
    cancel: CancellationToken,
    options: MonitorOptions,
}

/// Parts assembled by the composition root.
pub(crate) struct MonitorParts {
    pub state: Arc<StateStore>,
    pub config: Arc<ConfigStore>,
    pub bus: CommandBus,
    pub dispatcher: CommandDispatcher,
    pub registry: Arc<ModuleRegistry>,
    pub watcher: Arc<StateWatcher>,
    pub arbiter: Arc<PlayerArbiter>,
    pub clock: Arc<dyn Clock>,
    pub lifecycle: Arc<dyn Lifecycle>,
    pub spawner: TokioSpawner,
    pub cancel: CancellationToken,
    pub options: MonitorOptions,
}

impl Monitor {
    pub(crate) fn from_parts(parts: MonitorParts) -> Arc<Self> {
        let monitor = Arc::new(Self {
            state: parts.state,
            config: parts.config,
            bus: parts.bus,
            dispatcher: parts.dispatcher,
            registry: parts.registry,
            watcher: parts.watcher,
            arbiter: parts.arbiter,
            clock: parts.clock,
            lifecycle: parts.lifecycle,
            spawner: parts.spawner,
            cancel: parts.cancel,
            options: parts.options,
        });
        let handler: Arc<dyn CommandHandler> = monitor.clone();
        monitor.bus.bind_handler(Arc::downgrade(&handler));
        monitor
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn bus(&self) -> &CommandBus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn watcher(&self) -> &Arc<StateWatcher> {
        &self.watcher
    }

    pub fn arbiter(&self) -> &Arc<PlayerArbiter> {
        &self.arbiter
    }

    pub fn spawner(&self) -> &TokioSpawner {
        &self.spawner
    }

    /// Enqueues a command.
    pub fn submit(&self, target: &str, verb: &str, payload: impl Into<Value>) {
        self.bus.submit(target, verb, payload);
    }

    /// Returns true if the aggregate player is in a playing state.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.player_info().state.is_playing()
    }

    /// Returns the aggregate player metadata.
    #[must_use]
    pub fn player_info(&self) -> PlayerMetadata {
        PlayerMetadata::from_value(&self.state.get(PLAYER_KEY))
    }

    /// Starts the dispatch loops, loads every registered module, applies the
    /// startup volume and plays the ping sound.
    pub async fn start(&self) {
        log::info!("[Monitor] Starting");
        self.state.set(MODULES_KEY, Value::Array(Vec::new()));
        self.state.set(PLAYER_KEY, aggregate_player_node());

        self.dispatcher.start(
            self.spawner.clone(),
            self.options.command_workers,
            self.cancel.clone(),
        );
        self.watcher.start(
            self.spawner.clone(),
            self.options.listener_workers,
            self.cancel.clone(),
        );

        self.registry.load_all().await;

        let startup_volume = self.config.settings().startup_volume;
        if startup_volume > 0 {
            self.submit(PLAYER_KEY, "volume_set", startup_volume);
        }
        self.submit(PLAYER_KEY, "ping", Value::Null);
        log::info!("[Monitor] Started");
    }

    /// Stops the loops, waits for in-flight work, stops every module, and
    /// powers the player off.
    pub async fn shutdown(&self) {
        log::info!("[Monitor] Beginning graceful shutdown...");
        self.cancel.cancel();

        if !self.spawner.drain(self.options.shutdown_timeout).await {
            log::warn!(
                "[Monitor] {} task(s) still running after {:?}",
                self.spawner.active(),
                self.options.shutdown_timeout
            );
        }

        self.registry.stop_all().await;

        if let Err(e) = self.bus.execute("power", "poweroff", Value::Null).await {
            log::warn!("[Monitor] Failed to power off: {}", e);
        }
        log::info!("[Monitor] Shutdown complete");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // player
    // ─────────────────────────────────────────────────────────────────────────

    async fn player_command(&self, verb: &str, payload: Value) -> MonitorResult<()> {
        let verb = normalize_player_verb(verb, self.player_info().state);
        match verb.as_str() {
            "ping" => self.play_ping().await,
            "volume_up" => {
                if self.state.get_bool(&limiter_flag()) {
                    log::warn!("[Monitor] Volume limiter is active, ignoring volume_up");
                    return Ok(());
                }
                self.route_player_command(&verb, payload).await
            }
            "volume_down" => {
                self.route_player_command(&verb, payload).await?;
                self.state.set(&limiter_flag(), false);
                Ok(())
            }
            "volume_set" => {
                let level = payload_volume(&payload).ok_or_else(|| {
                    MonitorError::InvalidPayload(format!("volume_set expects a level, got {}", payload))
                })?;
                // The level is recorded even without a volume module so the
                // limiter still sees requests.
                if !self.dispatch_player_command(&verb, Value::from(level)).await? {
                    log::warn!(
                        "[Monitor] No module handled volume_set {}, recording level only",
                        level
                    );
                }

                let ceiling = volume_ceiling(&self.config.settings(), self.clock.hour());
                let at_limit = ceiling.is_some_and(|c| level >= c);
                self.state
                    .set(&format!("{}.volume_level", PLAYER_KEY), level);
                self.state.set(&limiter_flag(), at_limit);
                Ok(())
            }
            _ => self.route_player_command(&verb, payload).await,
        }
    }

    async fn play_ping(&self) -> MonitorResult<()> {
        let sound = self.config.settings().ping_sound;
        if sound.is_empty() {
            log::debug!("[Monitor] No ping sound configured");
            return Ok(());
        }
        self.route_player_command("play_notification", Value::String(sound))
            .await
    }

    /// Like [`dispatch_player_command`](Self::dispatch_player_command) but
    /// an unhandled verb is an error.
    async fn route_player_command(&self, verb: &str, payload: Value) -> MonitorResult<()> {
        if self.dispatch_player_command(verb, payload).await? {
            return Ok(());
        }
        Err(MonitorError::CommandFailed(format!(
            "no module handled player {}",
            verb
        )))
    }

    /// Sends a verb to the current backend, falling back to the volume
    /// control module for volume verbs and the local player otherwise.
    /// Returns whether any module handled it.
    async fn dispatch_player_command(&self, verb: &str, payload: Value) -> MonitorResult<bool> {
        let current = self.state.get_str(&format!("{}.current_player", PLAYER_KEY));
        if !current.is_empty() {
            if let Some(module) = self.registry.resolve(&current).await {
                if module.command(verb, payload.clone()).await? {
                    return Ok(true);
                }
            }
        }

        let settings = self.config.settings();
        let fallback = if verb.starts_with("volume") {
            settings.volume_control_module
        } else {
            settings.local_player_module
        };
        if !fallback.is_empty() && fallback != current {
            if let Some(module) = self.registry.resolve(&fallback).await {
                if module.command(verb, payload).await? {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // power
    // ─────────────────────────────────────────────────────────────────────────

    async fn power_command(&self, verb: &str, payload: Value) -> MonitorResult<()> {
        match verb {
            "power" => self.set_power(payload_truthy(&payload), false).await,
            "poweron" => self.set_power(true, false).await,
            "poweroff" => self.set_power(false, payload_truthy(&payload)).await,
            other => Err(MonitorError::CommandFailed(format!(
                "unknown power command {}",
                other
            ))),
        }
    }

    async fn set_power(&self, powered: bool, stop_players: bool) -> MonitorResult<()> {
        if !powered && stop_players {
            for player in self.state.get_str_list(&format!("{}.players", PLAYER_KEY)) {
                let state = PlaybackState::from_value(&self.state.get(&format!("{}.state", player)));
                if state.is_idle() || state == PlaybackState::Unknown {
                    continue;
                }
                if let Some(module) = self.registry.get(&player) {
                    if let Err(e) = module.command("stop", Value::Null).await {
                        log::warn!("[Monitor] Failed to stop {}: {}", player, e);
                    }
                }
            }
        }
        if self.state.set(&format!("{}.power", PLAYER_KEY), powered) {
            log::info!("[Monitor] Player power {}", if powered { "on" } else { "off" });
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // system
    // ─────────────────────────────────────────────────────────────────────────

    async fn system_command(&self, verb: &str, payload: Value) -> MonitorResult<()> {
        match verb {
            "saveconfig" => {
                if self.config.save_if_changed()? {
                    log::info!("[Monitor] Configuration changed, reloading");
                    self.submit("system", "reload", Value::Null);
                }
                Ok(())
            }
            "run_proc" => match payload {
                Value::String(cmd) if !cmd.trim().is_empty() => self.run_proc(cmd),
                other => Err(MonitorError::InvalidPayload(format!(
                    "run_proc expects a command line, got {}",
                    other
                ))),
            },
            "restart" | "reload" => {
                self.lifecycle.request_restart();
                Ok(())
            }
            "shutdown" => {
                self.lifecycle.request_shutdown();
                Ok(())
            }
            other => Err(MonitorError::CommandFailed(format!(
                "unknown system command {}",
                other
            ))),
        }
    }

    /// Spawns a shell command without waiting for it.
    fn run_proc(&self, cmd: String) -> MonitorResult<()> {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&cmd)
            .spawn()?;
        log::debug!("[Monitor] Started process: {}", cmd);

        self.spawner
            .spawn_guarded(format!("run_proc {}", cmd), async move {
                match child.wait().await {
                    Ok(status) if status.success() => {
                        log::debug!("[Monitor] Process finished: {}", cmd)
                    }
                    Ok(status) => log::warn!("[Monitor] Process {} exited with {}", cmd, status),
                    Err(e) => log::warn!("[Monitor] Failed to wait for {}: {}", cmd, e),
                }
            });
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // modules
    // ─────────────────────────────────────────────────────────────────────────

    async fn module_command(&self, target: &str, verb: &str, payload: Value) -> MonitorResult<()> {
        let module = self
            .registry
            .resolve(target)
            .await
            .ok_or_else(|| MonitorError::ModuleNotFound(target.to_string()))?;
        if !module.command(verb, payload).await? {
            log::warn!("[Monitor] Module {} does not support {}", target, verb);
        }
        Ok(())
    }
}

#[async_trait]
impl CommandHandler for Monitor {
    async fn handle(&self, command: Command) -> MonitorResult<()> {
        log::debug!("[Monitor] Processing {}", command);
        let Command {
            target,
            verb,
            payload,
            ..
        } = command;
        match target.as_str() {
            PLAYER_KEY => self.player_command(&verb, payload).await,
            "power" => self.power_command(&verb, payload).await,
            "system" => self.system_command(&verb, payload).await,
            _ => self.module_command(&target, &verb, payload).await,
        }
    }
}

fn limiter_flag() -> String {
    format!("{}.volume_limiter", PLAYER_KEY)
}
