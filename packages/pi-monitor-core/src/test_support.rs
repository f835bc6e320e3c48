//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::bootstrap::{bootstrap_monitor, BootstrapOptions, ConfigSource};
use crate::context::{FixedClock, ModuleContext};
use crate::lifecycle::NoopLifecycle;
use crate::monitor::{Monitor, MonitorOptions};
use crate::runtime::TokioSpawner;
use crate::services::StateWatcher;
use crate::store::StateStore;

/// An engine built from an in-memory config with a fixed noon clock.
pub(crate) struct TestEngine {
    pub monitor: Arc<Monitor>,
    pub state: Arc<StateStore>,
    pub watcher: Arc<StateWatcher>,
    pub spawner: TokioSpawner,
    pub clock: Arc<FixedClock>,
}

impl TestEngine {
    pub fn new(config: Value) -> Self {
        let document = match config {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let clock = Arc::new(FixedClock::new(12));
        let options = BootstrapOptions::new(ConfigSource::InMemory(document), Arc::new(NoopLifecycle))
            .with_clock(clock.clone())
            .with_monitor_options(MonitorOptions {
                shutdown_timeout: Duration::from_millis(200),
                ..MonitorOptions::default()
            });
        let monitor = bootstrap_monitor(options).expect("in-memory bootstrap");
        Self {
            state: Arc::clone(monitor.state()),
            watcher: Arc::clone(monitor.watcher()),
            spawner: monitor.spawner().clone(),
            monitor,
            clock,
        }
    }

    pub async fn started(config: Value) -> Self {
        let engine = Self::new(config);
        engine.monitor.start().await;
        engine
    }

    pub async fn shutdown(&self) {
        self.monitor.shutdown().await;
    }
}

/// A module context backed by a fresh, unstarted engine.
pub(crate) fn test_context(config: Value) -> ModuleContext {
    TestEngine::new(config).monitor.registry().context().clone()
}
