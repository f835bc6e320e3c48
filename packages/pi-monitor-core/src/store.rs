//! Observable hierarchical state store.
//!
//! [`StateStore`] holds every piece of live system state as a document tree
//! addressed by dot-separated paths (`player.volume_level`,
//! `spotify.title`). The first path segment names the top-level namespace;
//! every effective write stamps that namespace's `last_updated` and emits a
//! single [`StateEvent`] keyed on it.
//!
//! # Concurrency design
//!
//! The tree sits behind one `RwLock`. Writes are last-writer-wins with an
//! equality check and no transactions; writers are partitioned by domain
//! (each backend owns its namespace, the arbiter owns the mirrored `player`
//! fields) so there is nothing to merge. Events are pushed onto an unbounded
//! channel while the write lock is still held, which keeps the event order
//! identical to the mutation order.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::events::StateEvent;
use crate::utils::next_timestamp;

#[derive(Default)]
struct Tree {
    root: Map<String, Value>,
    updated: HashMap<String, u64>,
}

/// Observable key-value tree shared by every component.
pub struct StateStore {
    tree: RwLock<Tree>,
    events: mpsc::UnboundedSender<StateEvent>,
}

impl StateStore {
    /// Creates an empty store and the receiving end of its change events.
    ///
    /// The receiver is normally handed to the
    /// [`StateWatcher`](crate::services::StateWatcher); tests may drain it
    /// directly.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StateEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                tree: RwLock::new(Tree::default()),
                events,
            },
            rx,
        )
    }

    /// Reads the value at `path`, or `Value::Null` if nothing is there.
    #[must_use]
    pub fn get(&self, path: &str) -> Value {
        let segments = split_path(path);
        let tree = self.tree.read();
        let Some((first, rest)) = segments.split_first() else {
            return Value::Null;
        };
        let mut node = match tree.root.get(*first) {
            Some(v) => v,
            None => return Value::Null,
        };
        for segment in rest {
            node = match child(node, segment) {
                Some(v) => v,
                None => return Value::Null,
            };
        }
        node.clone()
    }

    /// Reads and deserializes the value at `path`.
    ///
    /// Returns `None` when the path is empty or the value has another shape.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        match self.get(path) {
            Value::Null => None,
            value => serde_json::from_value(value).ok(),
        }
    }

    /// Reads a string value, empty if missing or not a string.
    #[must_use]
    pub fn get_str(&self, path: &str) -> String {
        match self.get(path) {
            Value::String(s) => s,
            _ => String::new(),
        }
    }

    /// Reads a boolean value, false if missing or not a boolean.
    #[must_use]
    pub fn get_bool(&self, path: &str) -> bool {
        self.get(path).as_bool().unwrap_or(false)
    }

    /// Reads a list of strings, skipping non-string entries.
    #[must_use]
    pub fn get_str_list(&self, path: &str) -> Vec<String> {
        match self.get(path) {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Writes `value` at `path`, creating intermediate maps as needed.
    ///
    /// Returns true if the stored value changed. Writing an equal value is a
    /// no-op and emits nothing.
    pub fn set(&self, path: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        let segments = split_path(path);
        let Some(leaf) = segments.last().map(|s| s.to_string()) else {
            log::debug!("[StateStore] Ignoring write to empty path");
            return false;
        };

        let mut tree = self.tree.write();
        let Some(slot) = slot_mut(&mut tree.root, &segments) else {
            log::debug!("[StateStore] Ignoring write to unreachable path {}", path);
            return false;
        };
        if *slot == value {
            return false;
        }

        let changed = match (&*slot, &value) {
            (Value::Object(old), Value::Object(new)) => diff_fields(old, new),
            _ => vec![leaf.clone()],
        };
        *slot = value.clone();
        self.commit(&mut tree, segments[0], leaf, value, changed);
        true
    }

    /// Merges `partial` into the map at `path`.
    ///
    /// All changed fields are folded into one notification. It is keyed on
    /// `state` when the playback state is among them, on the single changed
    /// field when only one changed, and on the node itself otherwise.
    pub fn update(&self, path: &str, partial: Map<String, Value>) -> bool {
        let segments = split_path(path);
        if segments.is_empty() {
            log::debug!("[StateStore] Ignoring update of empty path");
            return false;
        }

        let mut tree = self.tree.write();
        let Some(slot) = slot_mut(&mut tree.root, &segments) else {
            log::debug!("[StateStore] Ignoring update of unreachable path {}", path);
            return false;
        };
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(node) = slot else {
            return false;
        };

        let mut changed = Vec::new();
        for (field, value) in partial {
            if node.get(&field) != Some(&value) {
                node.insert(field.clone(), value);
                changed.push(field);
            }
        }
        if changed.is_empty() {
            return false;
        }

        let (leaf, value) = if changed.iter().any(|f| f == "state") {
            ("state".to_string(), node.get("state").cloned().unwrap_or_default())
        } else if changed.len() == 1 {
            let field = changed[0].clone();
            let value = node.get(&field).cloned().unwrap_or_default();
            (field, value)
        } else {
            let name = segments.last().map(|s| s.to_string()).unwrap_or_default();
            (name, Value::Object(node.clone()))
        };
        self.commit(&mut tree, segments[0], leaf, value, changed);
        true
    }

    /// Appends `item` to the list at `path`, creating the list if needed.
    pub fn append(&self, path: &str, item: impl Into<Value>) {
        let segments = split_path(path);
        let Some(leaf) = segments.last().map(|s| s.to_string()) else {
            return;
        };

        let mut tree = self.tree.write();
        let Some(slot) = slot_mut(&mut tree.root, &segments) else {
            return;
        };
        if !slot.is_array() {
            *slot = Value::Array(Vec::new());
        }
        if let Value::Array(items) = &mut *slot {
            items.push(item.into());
        }
        let value = slot.clone();
        self.commit(&mut tree, segments[0], leaf.clone(), value, vec![leaf]);
    }

    /// Removes the node at `path`. Returns the removed value, if any.
    pub fn remove(&self, path: &str) -> Option<Value> {
        let segments = split_path(path);
        let (leaf, parents) = segments.split_last()?;

        let mut tree = self.tree.write();
        let removed = if parents.is_empty() {
            tree.root.remove(*leaf)
        } else {
            match slot_mut(&mut tree.root, parents) {
                Some(Value::Object(node)) => node.remove(*leaf),
                _ => None,
            }
        }?;
        self.commit(
            &mut tree,
            segments[0],
            leaf.to_string(),
            Value::Null,
            vec![leaf.to_string()],
        );
        Some(removed)
    }

    /// Returns when the namespace was last written, in Unix milliseconds.
    #[must_use]
    pub fn last_updated(&self, namespace: &str) -> Option<u64> {
        self.tree.read().updated.get(namespace).copied()
    }

    /// Returns a copy of the whole tree.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        Value::Object(self.tree.read().root.clone())
    }

    /// Stamps the namespace and queues the notification. Called with the
    /// write lock held.
    fn commit(
        &self,
        tree: &mut Tree,
        namespace: &str,
        leaf: String,
        value: Value,
        changed: Vec<String>,
    ) {
        let previous = tree.updated.get(namespace).copied().unwrap_or(0);
        let timestamp = next_timestamp(previous);
        tree.updated.insert(namespace.to_string(), timestamp);

        let event = StateEvent {
            key: namespace.to_string(),
            leaf,
            value,
            changed,
            timestamp,
        };
        if self.events.send(event).is_err() {
            log::trace!("[StateStore] No watcher attached for {}", namespace);
        }
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

fn child<'a>(node: &'a Value, segment: &str) -> Option<&'a Value> {
    match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Walks to the node at `segments`, creating maps along the way.
///
/// Scalars in the way are replaced by maps; list elements are addressed by
/// index and must already exist.
fn slot_mut<'a>(root: &'a mut Map<String, Value>, segments: &[&str]) -> Option<&'a mut Value> {
    let (first, rest) = segments.split_first()?;
    let mut node = root.entry(first.to_string()).or_insert(Value::Null);
    for segment in rest {
        node = match node {
            Value::Array(items) => {
                let index = segment.parse::<usize>().ok()?;
                items.get_mut(index)?
            }
            other => {
                if !other.is_object() {
                    *other = Value::Object(Map::new());
                }
                match other {
                    Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
                    _ => return None,
                }
            }
        };
    }
    Some(node)
}

fn diff_fields(old: &Map<String, Value>, new: &Map<String, Value>) -> Vec<String> {
    let mut changed: Vec<String> = new
        .iter()
        .filter(|(k, v)| old.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    changed.extend(old.keys().filter(|k| !new.contains_key(*k)).cloned());
    changed
}
