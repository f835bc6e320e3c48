//! General utilities shared across the engine.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Returns a timestamp that is strictly greater than `previous`.
///
/// Two writes inside the same millisecond still produce distinct
/// `last_updated` values, so "changed since" checks never miss a write.
#[must_use]
pub fn next_timestamp(previous: u64) -> u64 {
    now_millis().max(previous + 1)
}

// ─────────────────────────────────────────────────────────────────────────────
// Hostname Placeholders
// ─────────────────────────────────────────────────────────────────────────────

/// Placeholder stored in persisted config instead of the machine hostname.
pub const HOSTNAME_PLACEHOLDER: &str = "%hostname%";

/// Returns the machine hostname, resolved once per process.
pub fn local_hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default()
    })
}

/// Replaces the hostname with [`HOSTNAME_PLACEHOLDER`] in string values.
///
/// Lets a config file be copied between devices without carrying the old
/// device name along.
#[must_use]
pub fn collapse_hostname(value: Value, hostname: &str) -> Value {
    match value {
        Value::String(s) if !hostname.is_empty() && s.contains(hostname) => {
            Value::String(s.replace(hostname, HOSTNAME_PLACEHOLDER))
        }
        other => other,
    }
}

/// Expands [`HOSTNAME_PLACEHOLDER`] back to the hostname in string values.
#[must_use]
pub fn expand_hostname(value: Value, hostname: &str) -> Value {
    match value {
        Value::String(s) if s.contains(HOSTNAME_PLACEHOLDER) => {
            Value::String(s.replace(HOSTNAME_PLACEHOLDER, hostname))
        }
        other => other,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload Coercion
// ─────────────────────────────────────────────────────────────────────────────

/// Interprets a loosely-typed payload as a boolean switch.
///
/// Accepts JSON booleans, numbers (non-zero is true) and the strings
/// `on`, `true` and `1` in any case. Everything else is false.
#[must_use]
pub fn payload_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "on" | "true" | "1"),
        _ => false,
    }
}

/// Interprets a payload as a volume level, clamped to 0-100.
///
/// Accepts numbers and numeric strings (`"42"`, `"42%"`).
#[must_use]
pub fn payload_volume(value: &Value) -> Option<u8> {
    let level = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok()?,
        _ => return None,
    };
    Some(level.round().clamp(0.0, 100.0) as u8)
}
