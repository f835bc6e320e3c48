//! Capability modules.
//!
//! Every playback backend and hardware driver plugs into the engine through
//! the [`Module`] trait and is constructed on first use by its
//! [`ModuleFactory`]. The [`ModuleRegistry`] owns the live instances.
//!
//! Two orchestration modules ship with the engine: [`PowerSaveFactory`]
//! and [`SystemStateFactory`].

mod powersave;
mod registry;
mod systemstate;

pub use powersave::PowerSaveFactory;
pub use registry::ModuleRegistry;
pub use systemstate::SystemStateFactory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ModuleContext;
use crate::error::MonitorResult;

/// A loaded capability module.
///
/// Lifecycle is `loaded -> started -> stopped`. `stop` must tolerate being
/// called after a partially failed `start`.
#[async_trait]
pub trait Module: Send + Sync {
    /// Registry name; also the state namespace of player modules.
    fn name(&self) -> &str;

    /// Human-readable name listed under `modules`.
    fn display_name(&self) -> &str {
        self.name()
    }

    /// True for playback backends taking part in arbitration.
    fn is_player(&self) -> bool {
        false
    }

    /// Begins background work. Called once after a successful setup.
    async fn start(&self) -> MonitorResult<()>;

    /// Releases resources, deregisters listeners and ends child processes.
    async fn stop(&self) -> MonitorResult<()>;

    /// Executes a verb. Returns `Ok(false)` if the verb is unsupported so
    /// the caller can fall back to another module.
    async fn command(&self, verb: &str, payload: Value) -> MonitorResult<bool>;
}

/// Constructs a module on first use.
pub trait ModuleFactory: Send + Sync {
    /// Name the module is resolved by.
    fn name(&self) -> &str;

    /// Builds the module, or returns
    /// [`MonitorError::ModuleUnavailable`](crate::error::MonitorError::ModuleUnavailable)
    /// when a required dependency is missing.
    fn setup(&self, ctx: &ModuleContext) -> MonitorResult<Arc<dyn Module>>;
}

/// Factories for the modules that ship with the engine.
#[must_use]
pub fn builtin_factories() -> Vec<Arc<dyn ModuleFactory>> {
    vec![
        Arc::new(PowerSaveFactory),
        Arc::new(SystemStateFactory::default()),
    ]
}
