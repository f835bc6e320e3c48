//! Shared handles given to capability modules.
//!
//! This module provides [`ModuleContext`], which bundles what a module
//! factory may use: the state store, the config, command submission and
//! listener registration. It also carries the [`Clock`] seam used wherever
//! the engine depends on the local time of day.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Timelike;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::bus::CommandBus;
use crate::config::ConfigStore;
use crate::events::{ListenerId, StateListener};
use crate::runtime::TokioSpawner;
use crate::services::StateWatcher;
use crate::store::StateStore;

/// Handles shared with every module factory.
#[derive(Clone)]
pub struct ModuleContext {
    pub state: Arc<StateStore>,
    pub config: Arc<ConfigStore>,
    pub bus: CommandBus,
    pub watcher: Arc<StateWatcher>,
    pub spawner: TokioSpawner,
    pub clock: Arc<dyn Clock>,
    /// Cancelled on engine shutdown. Module background loops stop on it.
    pub cancel: CancellationToken,
}

impl ModuleContext {
    /// Enqueues a command on the bus.
    pub fn submit(&self, target: &str, verb: &str, payload: impl Into<Value>) {
        self.bus.submit(target, verb, payload);
    }

    /// Registers a state listener, optionally restricted to one namespace.
    pub fn register_listener(
        &self,
        listener: Arc<dyn StateListener>,
        filter: Option<&str>,
    ) -> ListenerId {
        self.watcher.register_listener(listener, filter)
    }

    /// Removes a listener registered through this context.
    pub fn deregister_listener(&self, id: ListenerId) -> bool {
        self.watcher.deregister_listener(id)
    }
}

/// Source of the local time of day.
///
/// Different environments may need different sources; tests inject a fixed
/// hour instead of depending on the wall clock.
pub trait Clock: Send + Sync {
    /// Current local hour, 0-23.
    fn hour(&self) -> u32;
}

/// Wall-clock time in the system's local timezone.
#[derive(Debug, Clone, Default)]
pub struct LocalClock;

impl LocalClock {
    /// Creates a new `LocalClock` wrapped in an Arc.
    #[must_use]
    pub fn arc() -> Arc<dyn Clock> {
        Arc::new(Self)
    }
}

impl Clock for LocalClock {
    fn hour(&self) -> u32 {
        chrono::Local::now().hour()
    }
}

/// Clock pinned to an adjustable hour.
#[derive(Debug, Default)]
pub struct FixedClock {
    hour: AtomicU32,
}

impl FixedClock {
    #[must_use]
    pub fn new(hour: u32) -> Self {
        Self {
            hour: AtomicU32::new(hour % 24),
        }
    }

    pub fn set_hour(&self, hour: u32) {
        self.hour.store(hour % 24, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn hour(&self) -> u32 {
        self.hour.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_clock_reports_valid_hour() {
        assert!(LocalClock.hour() < 24);
    }

    #[test]
    fn fixed_clock_wraps_and_updates() {
        let clock = FixedClock::new(25);
        assert_eq!(clock.hour(), 1);
        clock.set_hour(8);
        assert_eq!(clock.hour(), 8);
    }
}
