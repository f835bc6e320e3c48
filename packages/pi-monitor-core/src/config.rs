//! User configuration: typed settings, the live config namespace, and the
//! persisted config document.
//!
//! The config lives in the `config` namespace of the [`StateStore`], so every
//! change is observable like any other state. It is written to disk only on
//! an explicit save, and only if `last_updated` moved since the previous save.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::CONFIG_KEY;
use crate::error::{MonitorError, MonitorResult};
use crate::store::StateStore;
use crate::utils::{collapse_hostname, expand_hostname, local_hostname};

/// Settings the engine itself reads from the config document.
///
/// All fields have sensible defaults. Volume levels are 0-100 and a zero
/// limiter threshold disables that limiter.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Settings {
    /// Volume applied at startup (0 = leave the mixer alone).
    pub startup_volume: u8,

    /// Volume used while a notification or voice assistant holds the output.
    pub notify_volume: u8,

    /// Volume used while an alert holds the output.
    pub alert_volume: u8,

    /// Volume ceiling outside the morning window.
    pub volume_limiter: u8,

    /// Stricter ceiling between 01:00 and 09:00.
    pub volume_limiter_morning: u8,

    /// Enables debug logging.
    pub enable_debug: bool,

    /// Re-acquire the shared audio sink on takeover with a pause/play cycle.
    pub flush_on_takeover: bool,

    /// Delay between the flush pause and play (milliseconds).
    pub flush_delay_ms: u64,

    /// Module handling volume verbs when the active backend does not.
    pub volume_control_module: String,

    /// Module handling playback verbs when no backend does.
    pub local_player_module: String,

    /// Sound file played by `player ping`.
    pub ping_sound: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            startup_volume: 0,
            notify_volume: 60,
            alert_volume: 70,
            volume_limiter: 0,
            volume_limiter_morning: 0,
            enable_debug: false,
            flush_on_takeover: true,
            flush_delay_ms: 1000,
            volume_control_module: "alsa".to_string(),
            local_player_module: "localplayer".to_string(),
            ping_sound: String::new(),
        }
    }
}

impl Settings {
    /// Reads settings from a config document.
    ///
    /// Keys with a value of the wrong type fall back to their default
    /// instead of discarding the whole document.
    #[must_use]
    pub fn from_document(document: &Map<String, Value>) -> Self {
        if let Ok(settings) = serde_json::from_value(Value::Object(document.clone())) {
            return settings;
        }

        let mut merged = Self::default_document();
        for (key, value) in document {
            if !merged.contains_key(key) {
                continue;
            }
            let previous = merged.insert(key.clone(), value.clone());
            if serde_json::from_value::<Self>(Value::Object(merged.clone())).is_err() {
                log::warn!("[Config] Ignoring invalid value for {}: {}", key, value);
                if let Some(previous) = previous {
                    merged.insert(key.clone(), previous);
                }
            }
        }
        serde_json::from_value(Value::Object(merged)).unwrap_or_default()
    }

    /// Default settings as an ordered document.
    #[must_use]
    pub fn default_document() -> Map<String, Value> {
        match serde_json::to_value(Self::default()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Config key holding the enable flag of a module.
#[must_use]
pub fn module_enable_key(module: &str) -> String {
    format!("ENABLE_MODULE_{}", module.to_ascii_uppercase())
}

// ─────────────────────────────────────────────────────────────────────────────
// Persisted Document
// ─────────────────────────────────────────────────────────────────────────────

/// The JSON config document on disk.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the document.
    ///
    /// A missing file yields an empty document (first boot). A file that
    /// exists but cannot be read or parsed is an error: starting with
    /// defaults would overwrite the user's settings on the next save.
    pub fn load(&self) -> MonitorResult<Map<String, Value>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!(
                    "[Config] No config file at {}, starting with defaults",
                    self.path.display()
                );
                return Ok(Map::new());
            }
            Err(e) => {
                return Err(MonitorError::Config(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(MonitorError::Config(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(MonitorError::Config(format!(
                "failed to parse {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Saves the document.
    ///
    /// Uses atomic write (temp file + rename) to prevent corruption on crash.
    /// Creates the parent directory if it doesn't exist.
    pub fn save(&self, document: &Map<String, Value>) -> MonitorResult<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let mut temp_path = self.path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);
        let contents = serde_json::to_string_pretty(document)?;

        // Write to temp file first
        std::fs::write(&temp_path, contents)?;
        // Atomic rename (on most filesystems)
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Live Config
// ─────────────────────────────────────────────────────────────────────────────

/// Read/write access to the `config` namespace plus explicit persistence.
pub struct ConfigStore {
    state: Arc<StateStore>,
    file: Option<ConfigFile>,
    /// `last_updated` of the config namespace at the last save. The lock
    /// also serialises concurrent saves.
    last_saved: Mutex<Option<u64>>,
    hostname: String,
}

impl ConfigStore {
    /// Loads the document from `file` into the state store.
    ///
    /// Known settings come first in their default order, followed by any
    /// module-specific keys from the file.
    pub fn load(state: Arc<StateStore>, file: ConfigFile) -> MonitorResult<Self> {
        let document = file.load()?;
        Ok(Self::with_document(state, Some(file), document))
    }

    /// Creates a config that is never written to disk.
    pub fn in_memory(state: Arc<StateStore>, document: Map<String, Value>) -> Self {
        Self::with_document(state, None, document)
    }

    fn with_document(
        state: Arc<StateStore>,
        file: Option<ConfigFile>,
        document: Map<String, Value>,
    ) -> Self {
        let settings = Settings::from_document(&document);
        let mut merged = match serde_json::to_value(&settings) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (key, value) in document {
            if !merged.contains_key(&key) {
                merged.insert(key, value);
            }
        }
        state.set(CONFIG_KEY, Value::Object(merged));

        let last_saved = state.last_updated(CONFIG_KEY);
        Self {
            state,
            file,
            last_saved: Mutex::new(last_saved),
            hostname: local_hostname().to_string(),
        }
    }

    /// Returns the typed engine settings.
    #[must_use]
    pub fn settings(&self) -> Settings {
        Settings::from_document(&self.document())
    }

    /// Returns the whole document, hostname placeholders left in place.
    #[must_use]
    pub fn document(&self) -> Map<String, Value> {
        match self.state.get(CONFIG_KEY) {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Reads a single key, expanding the hostname placeholder.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        expand_hostname(self.state.get(&config_path(key)), &self.hostname)
    }

    /// Reads a key, falling back to `default` when it is missing.
    #[must_use]
    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Value {
        match self.get(key) {
            Value::Null => default.into(),
            value => value,
        }
    }

    /// Writes a single key. Returns true if the value changed.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> bool {
        let value = collapse_hostname(value.into(), &self.hostname);
        self.state.set(&config_path(key), value)
    }

    /// Returns whether a module is enabled. Modules are enabled unless their
    /// `ENABLE_MODULE_<NAME>` flag is explicitly false.
    #[must_use]
    pub fn module_enabled(&self, module: &str) -> bool {
        !matches!(self.get(&module_enable_key(module)), Value::Bool(false))
    }

    /// Returns true if the config changed since it was loaded or last saved.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        *self.last_saved.lock() != self.state.last_updated(CONFIG_KEY)
    }

    /// Persists the document if it changed since the last save.
    ///
    /// Returns `Ok(true)` when a write happened. A config without a backing
    /// file only resets its dirty marker.
    pub fn save_if_changed(&self) -> MonitorResult<bool> {
        let mut last_saved = self.last_saved.lock();
        let current = self.state.last_updated(CONFIG_KEY);
        if *last_saved == current {
            log::info!("[Config] Configuration did not change");
            return Ok(false);
        }

        let Some(file) = &self.file else {
            log::debug!("[Config] In-memory configuration, nothing to write");
            *last_saved = current;
            return Ok(false);
        };
        file.save(&self.document())?;
        *last_saved = current;
        log::info!("[Config] Saved configuration to {}", file.path().display());
        Ok(true)
    }
}

fn config_path(key: &str) -> String {
    format!("{}.{}", CONFIG_KEY, key)
}
