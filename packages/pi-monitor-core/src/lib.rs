//! Pi Monitor Core - audio output orchestration engine.
//!
//! This crate provides the engine behind the Pi Monitor daemon: a shared
//! hierarchical state tree, a command bus, a registry of pluggable capability
//! modules and the policies that keep several audio players from talking
//! over each other.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`store`]: Hierarchical state tree with change notification
//! - [`bus`]: Asynchronous command queue and dispatcher
//! - [`modules`]: Capability module contract, registry and built-in modules
//! - [`services`]: State watcher, player arbitration and volume limiter
//! - [`monitor`]: The orchestrator handling `player`, `power` and `system`
//! - [`config`]: Persistent user configuration
//! - [`bootstrap`]: Composition root wiring everything together
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple core logic from the
//! environment it runs in:
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`Lifecycle`](lifecycle::Lifecycle): Restart and shutdown requests
//! - [`Clock`](context::Clock): Local time of day
//! - [`Module`](modules::Module) / [`ModuleFactory`](modules::ModuleFactory): Capability plugins
//! - [`StateListener`](events::StateListener): State change observers
//!
//! Each trait has a default implementation suitable for the standalone daemon.

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod bus;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod modules;
pub mod monitor;
pub mod player;
pub mod runtime;
pub mod services;
pub mod store;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-export commonly used types at the crate root
pub use bus::{Command, CommandBus, CommandHandler};
pub use config::{ConfigFile, ConfigStore, Settings};
pub use context::{Clock, FixedClock, LocalClock, ModuleContext};
pub use error::{ErrorCode, MonitorError, MonitorResult};
pub use events::{BroadcastStateBridge, ListenerId, LoggingListener, StateEvent, StateListener};
pub use lifecycle::{Lifecycle, NoopLifecycle, ServerLifecycle};
pub use player::{PlaybackState, PlayerMetadata};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use store::StateStore;
pub use utils::now_millis;

// Re-export module types
pub use modules::{builtin_factories, Module, ModuleFactory, ModuleRegistry};

// Re-export service types
pub use services::{Arbitration, PlayerArbiter, SavedPlayback, StateWatcher, VolumeLimiter};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_monitor, BootstrapOptions, ConfigSource};
pub use monitor::{Monitor, MonitorOptions};
