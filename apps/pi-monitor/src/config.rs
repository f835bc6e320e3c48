//! Daemon configuration.
//!
//! Supports loading from YAML files with environment variable overrides.
//! This only covers how the process runs; user settings live in the JSON
//! settings document managed by the engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use pi_monitor_core::constants::{
    DEFAULT_COMMAND_WORKERS, DEFAULT_CONFIG_FILE, DEFAULT_LISTENER_WORKERS,
    DEFAULT_SHUTDOWN_JOIN_TIMEOUT,
};
use pi_monitor_core::MonitorOptions;
use serde::Deserialize;

/// Daemon configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// JSON settings document read at startup and written on `saveconfig`.
    /// Override: `PIMON_SETTINGS`
    pub settings_path: PathBuf,

    /// Maximum commands executing at once.
    /// Override: `PIMON_COMMAND_WORKERS`
    pub command_workers: usize,

    /// Maximum listener callbacks executing at once.
    /// Override: `PIMON_LISTENER_WORKERS`
    pub listener_workers: usize,

    /// Seconds shutdown waits for in-flight work before giving up.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            command_workers: DEFAULT_COMMAND_WORKERS,
            listener_workers: DEFAULT_LISTENER_WORKERS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_JOIN_TIMEOUT.as_secs(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PIMON_COMMAND_WORKERS") {
            if let Ok(workers) = val.parse() {
                self.command_workers = workers;
            }
        }

        if let Ok(val) = std::env::var("PIMON_LISTENER_WORKERS") {
            if let Ok(workers) = val.parse() {
                self.listener_workers = workers;
            }
        }

        // Note: PIMON_SETTINGS is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to the engine's sizing options.
    pub fn to_monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            command_workers: self.command_workers.max(1),
            listener_workers: self.listener_workers.max(1),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}
