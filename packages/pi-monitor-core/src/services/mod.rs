//! Engine services.
//!
//! These sit between the state store and the command bus: the watcher fans
//! state changes out, and the arbiter and volume limiter react to them by
//! submitting commands.

pub mod arbiter;
pub mod volume_limiter;
pub mod watcher;

pub use arbiter::{Arbitration, PlayerArbiter, SavedPlayback};
pub use volume_limiter::{volume_ceiling, VolumeLimiter};
pub use watcher::StateWatcher;
