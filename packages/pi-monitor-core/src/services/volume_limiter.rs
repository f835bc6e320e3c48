//! Volume ceiling enforcement.
//!
//! Watches the aggregate `player.volume_level` and submits a `volume_set`
//! back down to the ceiling whenever it is exceeded. The state is never
//! rewritten directly; the correction goes through the same command path as
//! any user request.

use std::sync::Arc;

use crate::bus::CommandBus;
use crate::config::{ConfigStore, Settings};
use crate::constants::{MORNING_END_HOUR, MORNING_START_HOUR, PLAYER_KEY};
use crate::context::Clock;
use crate::store::StateStore;

/// Returns the applicable ceiling for `hour`, or `None` when unlimited.
///
/// The morning ceiling applies from 01:00 up to 09:00 when set. Outside that
/// window, or when it is zero, the default ceiling applies when set.
#[must_use]
pub fn volume_ceiling(settings: &Settings, hour: u32) -> Option<u8> {
    let morning = (MORNING_START_HOUR..MORNING_END_HOUR).contains(&hour);
    if morning && settings.volume_limiter_morning > 0 {
        Some(settings.volume_limiter_morning)
    } else if settings.volume_limiter > 0 {
        Some(settings.volume_limiter)
    } else {
        None
    }
}

pub struct VolumeLimiter {
    state: Arc<StateStore>,
    config: Arc<ConfigStore>,
    bus: CommandBus,
    clock: Arc<dyn Clock>,
}

impl VolumeLimiter {
    pub fn new(
        state: Arc<StateStore>,
        config: Arc<ConfigStore>,
        bus: CommandBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state,
            config,
            bus,
            clock,
        }
    }

    /// Checks the aggregate volume against the current ceiling.
    ///
    /// Returns the ceiling that was enforced, if a correction was submitted.
    pub fn check(&self) -> Option<u8> {
        let level = self
            .state
            .get_as::<f64>(&format!("{}.volume_level", PLAYER_KEY))?;
        let ceiling = volume_ceiling(&self.config.settings(), self.clock.hour())?;
        if level <= f64::from(ceiling) {
            return None;
        }

        log::warn!(
            "[VolumeLimiter] Volume {} exceeds limit {}, lowering",
            level,
            ceiling
        );
        self.bus.submit(PLAYER_KEY, "volume_set", ceiling);
        self.state
            .set(&format!("{}.volume_limiter", PLAYER_KEY), true);
        Some(ceiling)
    }
}
