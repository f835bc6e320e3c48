//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! engine parts are instantiated and wired together. The daemon, the
//! integration tests and embedding applications all build the engine here.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::bus::CommandBus;
use crate::config::{ConfigFile, ConfigStore};
use crate::context::{Clock, LocalClock, ModuleContext};
use crate::error::MonitorResult;
use crate::events::LoggingListener;
use crate::lifecycle::Lifecycle;
use crate::modules::ModuleRegistry;
use crate::monitor::{Monitor, MonitorOptions, MonitorParts};
use crate::runtime::TokioSpawner;
use crate::services::{PlayerArbiter, StateWatcher, VolumeLimiter};
use crate::store::StateStore;

/// Where the user configuration comes from.
pub enum ConfigSource {
    /// JSON document on disk, written back on `system saveconfig`.
    File(ConfigFile),
    /// Document held in memory only.
    InMemory(Map<String, Value>),
}

/// Inputs to [`bootstrap_monitor`].
pub struct BootstrapOptions {
    pub config: ConfigSource,
    pub lifecycle: Arc<dyn Lifecycle>,
    pub clock: Arc<dyn Clock>,
    pub monitor: MonitorOptions,
}

impl BootstrapOptions {
    /// Options with the wall clock and default sizing.
    pub fn new(config: ConfigSource, lifecycle: Arc<dyn Lifecycle>) -> Self {
        Self {
            config,
            lifecycle,
            clock: LocalClock::arc(),
            monitor: MonitorOptions::default(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_monitor_options(mut self, monitor: MonitorOptions) -> Self {
        self.monitor = monitor;
        self
    }
}

/// Builds the engine.
///
/// The wiring order follows the dependencies:
///
/// 1. Shared infrastructure (task spawner, cancellation token)
/// 2. State store and the config loaded into it
/// 3. Command bus
/// 4. Arbiter and volume limiter (depend on state, config, bus)
/// 5. State watcher (owns the store's event stream, runs the policies)
/// 6. Module registry (depends on everything a module may touch)
/// 7. Monitor (binds itself as the bus handler)
///
/// Nothing runs until [`Monitor::start`].
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed.
///
/// # Panics
///
/// Panics if called outside of a Tokio runtime context.
pub fn bootstrap_monitor(options: BootstrapOptions) -> MonitorResult<Arc<Monitor>> {
    let spawner = TokioSpawner::current();
    let cancel = CancellationToken::new();

    let (state, events) = StateStore::new();
    let state = Arc::new(state);
    let config = Arc::new(match options.config {
        ConfigSource::File(file) => ConfigStore::load(Arc::clone(&state), file)?,
        ConfigSource::InMemory(document) => ConfigStore::in_memory(Arc::clone(&state), document),
    });

    let (bus, dispatcher) = CommandBus::new();

    let arbiter = Arc::new(PlayerArbiter::new(
        Arc::clone(&state),
        Arc::clone(&config),
        bus.clone(),
        spawner.clone(),
    ));
    let limiter = Arc::new(VolumeLimiter::new(
        Arc::clone(&state),
        Arc::clone(&config),
        bus.clone(),
        Arc::clone(&options.clock),
    ));

    let watcher = Arc::new(StateWatcher::new(
        Arc::clone(&state),
        events,
        Arc::clone(&arbiter),
        limiter,
    ));
    if config.settings().enable_debug {
        watcher.register_listener(Arc::new(LoggingListener), None);
    }

    let registry = Arc::new(ModuleRegistry::new(ModuleContext {
        state: Arc::clone(&state),
        config: Arc::clone(&config),
        bus: bus.clone(),
        watcher: Arc::clone(&watcher),
        spawner: spawner.clone(),
        clock: Arc::clone(&options.clock),
        cancel: cancel.child_token(),
    }));

    Ok(Monitor::from_parts(MonitorParts {
        state,
        config,
        bus,
        dispatcher,
        registry,
        watcher,
        arbiter,
        clock: options.clock,
        lifecycle: options.lifecycle,
        spawner,
        cancel,
        options: options.monitor,
    }))
}
