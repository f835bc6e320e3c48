//! State change events and their delivery seams.
//!
//! This module provides:
//! - [`StateEvent`], the notification produced by every effective
//!   [`StateStore`](crate::store::StateStore) write
//! - [`StateListener`] trait for components that observe state changes
//! - [`BroadcastStateBridge`] for remote observers (displays, MQTT bridges)

mod bridge;
mod listener;

pub use bridge::BroadcastStateBridge;
pub use listener::{ListenerId, LoggingListener, StateListener};

use serde::Serialize;
use serde_json::Value;

/// A single change notification from the state store.
///
/// `key` is always the top-level namespace that owns the written node, no
/// matter how deep the write went. `leaf` is the last path segment that was
/// written (equal to `key` for whole-namespace writes). `changed` lists every
/// field folded into this notification when several fields changed at once.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEvent {
    /// Top-level namespace, e.g. `player` or `spotify`.
    pub key: String,
    /// Last path segment that was written.
    pub leaf: String,
    /// New value of the written node.
    pub value: Value,
    /// Every field changed by the write, `leaf` included.
    pub changed: Vec<String>,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

impl StateEvent {
    /// Returns true if `field` was changed by the write behind this event.
    #[must_use]
    pub fn touches(&self, field: &str) -> bool {
        self.leaf == field || self.changed.iter().any(|c| c == field)
    }
}
