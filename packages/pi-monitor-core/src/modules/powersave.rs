//! Power saving policy.
//!
//! Switches the CPU governor with the player's power state and powers the
//! player off after it has been idle for a while.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{Module, ModuleFactory};
use crate::constants::{
    DEFAULT_AUTO_POWER_OFF_SECONDS, DEFAULT_POWERSAVE_COMMAND_OFF, DEFAULT_POWERSAVE_COMMAND_ON,
    PLAYER_KEY,
};
use crate::context::ModuleContext;
use crate::error::{MonitorError, MonitorResult};
use crate::events::{ListenerId, StateEvent, StateListener};
use crate::player::PlaybackState;
use crate::runtime::TaskSpawner;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PowerSaveSettings {
    command_on: String,
    command_off: String,
    idle_timeout: Duration,
}

impl PowerSaveSettings {
    fn from_context(ctx: &ModuleContext) -> Self {
        let text = |key: &str, default: &str| match ctx.config.get_or(key, default) {
            Value::String(s) => s,
            _ => String::new(),
        };
        let seconds = ctx
            .config
            .get_or("AUTO_POWER_OFF_WHEN_IDLE_SECONDS", DEFAULT_AUTO_POWER_OFF_SECONDS)
            .as_f64()
            .unwrap_or(0.0)
            .max(0.0);
        Self {
            command_on: text("POWERSAVE_COMMAND_ON", DEFAULT_POWERSAVE_COMMAND_ON),
            command_off: text("POWERSAVE_COMMAND_OFF", DEFAULT_POWERSAVE_COMMAND_OFF),
            idle_timeout: Duration::from_secs_f64(seconds),
        }
    }
}

/// Builds the powersave module.
#[derive(Debug, Default)]
pub struct PowerSaveFactory;

impl ModuleFactory for PowerSaveFactory {
    fn name(&self) -> &str {
        "powersave"
    }

    fn setup(&self, ctx: &ModuleContext) -> MonitorResult<Arc<dyn Module>> {
        let settings = PowerSaveSettings::from_context(ctx);
        if settings.command_on.is_empty()
            && settings.command_off.is_empty()
            && settings.idle_timeout.is_zero()
        {
            return Err(MonitorError::unavailable(
                "powersave",
                "no powersave commands and no idle timeout configured",
            ));
        }
        Ok(Arc::new(PowerSave {
            policy: Arc::new(PowerSavePolicy {
                ctx: ctx.clone(),
                settings,
                idle_timer: Mutex::new(None),
            }),
            listener: Mutex::new(None),
        }))
    }
}

struct PowerSave {
    policy: Arc<PowerSavePolicy>,
    listener: Mutex<Option<ListenerId>>,
}

struct PowerSavePolicy {
    ctx: ModuleContext,
    settings: PowerSaveSettings,
    idle_timer: Mutex<Option<CancellationToken>>,
}

impl PowerSavePolicy {
    fn powered(&self) -> bool {
        self.ctx.state.get_bool(&format!("{}.power", PLAYER_KEY))
    }

    fn player_idle(&self) -> bool {
        PlaybackState::from_value(&self.ctx.state.get(&format!("{}.state", PLAYER_KEY))).is_idle()
    }

    fn on_power_changed(&self) {
        let command = if self.powered() {
            &self.settings.command_off
        } else {
            &self.settings.command_on
        };
        if !command.is_empty() {
            self.ctx.submit("system", "run_proc", command.as_str());
        }
    }

    fn on_playback_changed(self: &Arc<Self>) {
        if self.settings.idle_timeout.is_zero() {
            return;
        }
        if self.player_idle() && self.powered() {
            self.arm_idle_timer();
        } else {
            self.cancel_idle_timer();
        }
    }

    fn arm_idle_timer(self: &Arc<Self>) {
        let token = self.ctx.cancel.child_token();
        if let Some(previous) = self.idle_timer.lock().replace(token.clone()) {
            previous.cancel();
        }

        let policy = Arc::clone(self);
        let timeout = self.settings.idle_timeout;
        self.ctx
            .spawner
            .spawn_guarded("powersave idle timer".into(), async move {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(timeout) => {}
                }
                if policy.player_idle() && policy.powered() {
                    log::info!(
                        "[PowerSave] Player idle for {:?}, powering off",
                        timeout
                    );
                    policy.ctx.submit("power", "poweroff", Value::Null);
                }
            });
    }

    fn cancel_idle_timer(&self) {
        if let Some(token) = self.idle_timer.lock().take() {
            token.cancel();
        }
    }
}

struct PolicyListener(Arc<PowerSavePolicy>);

#[async_trait]
impl StateListener for PolicyListener {
    async fn on_state_changed(&self, event: StateEvent) {
        if event.touches("power") {
            self.0.on_power_changed();
        }
        if event.touches("state") {
            self.0.on_playback_changed();
        }
    }
}

#[async_trait]
impl Module for PowerSave {
    fn name(&self) -> &str {
        "powersave"
    }

    fn display_name(&self) -> &str {
        "PowerSave"
    }

    async fn start(&self) -> MonitorResult<()> {
        let id = self
            .policy
            .ctx
            .register_listener(Arc::new(PolicyListener(Arc::clone(&self.policy))), Some(PLAYER_KEY));
        *self.listener.lock() = Some(id);
        Ok(())
    }

    async fn stop(&self) -> MonitorResult<()> {
        self.policy.cancel_idle_timer();
        if let Some(id) = self.listener.lock().take() {
            self.policy.ctx.deregister_listener(id);
        }
        let command = &self.policy.settings.command_off;
        if !command.is_empty() {
            self.policy
                .ctx
                .bus
                .execute("system", "run_proc", command.as_str())
                .await?;
        }
        Ok(())
    }

    async fn command(&self, _verb: &str, _payload: Value) -> MonitorResult<bool> {
        Ok(false)
    }
}
