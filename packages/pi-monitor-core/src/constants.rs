//! Fixed engine constants.
//!
//! Tunables that users are expected to change live in the config document
//! (see [`crate::config::Settings`]); the values here are structural.

use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch Loops
// ─────────────────────────────────────────────────────────────────────────────

/// How long a dispatch loop sleeps on an empty queue before a liveness wake.
///
/// Loops are woken by every submit; this timeout only guards against a lost
/// wake-up and is not a polling interval.
pub const LOOP_IDLE_TIMEOUT: Duration = Duration::from_secs(1200);

/// Default number of command workers that may run concurrently.
pub const DEFAULT_COMMAND_WORKERS: usize = 32;

/// Default number of listener callbacks that may run concurrently.
pub const DEFAULT_LISTENER_WORKERS: usize = 32;

/// Bounded wait for in-flight workers during shutdown.
pub const DEFAULT_SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the broadcast channel used by remote state observers.
pub const STATE_BROADCAST_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// State Namespaces
// ─────────────────────────────────────────────────────────────────────────────

/// Aggregate player node mirroring the active backend.
pub const PLAYER_KEY: &str = "player";

/// List of loaded module display names.
pub const MODULES_KEY: &str = "modules";

/// Persisted user configuration.
pub const CONFIG_KEY: &str = "config";

// ─────────────────────────────────────────────────────────────────────────────
// Volume Limiter
// ─────────────────────────────────────────────────────────────────────────────

/// First hour (inclusive) of the stricter morning window.
///
/// Hour 0 is deliberately outside the window so late-night use is not capped.
pub const MORNING_START_HOUR: u32 = 1;

/// Hour (exclusive) at which the morning window ends.
pub const MORNING_END_HOUR: u32 = 9;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in log lines and process titles.
pub const APP_NAME: &str = "pi-monitor";

/// Default location of the persisted config document.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/pi-monitor.json";

/// Exit code asking the service manager to start the daemon again.
pub const EXIT_CODE_RESTART: i32 = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Built-in Modules
// ─────────────────────────────────────────────────────────────────────────────

/// Kernel thermal zone read by the systemstate module.
pub const CPU_TEMP_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Interval between system state samples.
pub const SYSTEM_STATE_INTERVAL: Duration = Duration::from_secs(600);

/// Default command enabling CPU power saving.
pub const DEFAULT_POWERSAVE_COMMAND_ON: &str = "cpufreq-set -g powersave";

/// Default command disabling CPU power saving.
pub const DEFAULT_POWERSAVE_COMMAND_OFF: &str = "cpufreq-set -g ondemand";

/// Default idle time before the player is powered off automatically.
pub const DEFAULT_AUTO_POWER_OFF_SECONDS: u64 = 5;
