//! Pi Monitor - headless audio output orchestration daemon.
//!
//! This binary runs the orchestration engine as a background service. The
//! service manager is expected to restart it when it exits with the restart
//! code (after `system restart`, `system reload` or a changed config save).

mod config;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pi_monitor_core::{
    bootstrap_monitor, builtin_factories, BootstrapOptions, ConfigFile, ConfigSource, Settings,
    ServerLifecycle,
};
use crate::config::ServerConfig;
use crate::signals::ShutdownSignals;

/// Pi Monitor - arbitrates the active audio output across playback backends.
#[derive(Parser, Debug)]
#[command(name = "pi-monitor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the daemon configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "PIMON_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Settings document (overrides config file).
    #[arg(short = 's', long, env = "PIMON_SETTINGS")]
    settings: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(settings) = args.settings {
        config.settings_path = settings;
    }

    let settings_file = ConfigFile::new(&config.settings_path);
    let document = settings_file.load().with_context(|| {
        format!(
            "Failed to load settings from {}",
            config.settings_path.display()
        )
    })?;

    // Initialize logging
    let mut level = args.log_level;
    if Settings::from_document(&document).enable_debug && level < log::LevelFilter::Debug {
        level = log::LevelFilter::Debug;
    }
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .init();

    log::info!("Pi Monitor v{}", env!("CARGO_PKG_VERSION"));
    log::info!(
        "Configuration: settings={}, command_workers={}, listener_workers={}",
        config.settings_path.display(),
        config.command_workers,
        config.listener_workers
    );

    let mut signals = ShutdownSignals::install().context("Failed to install signal handlers")?;
    let lifecycle = Arc::new(ServerLifecycle::new());
    let options = BootstrapOptions::new(ConfigSource::File(settings_file), lifecycle.clone())
        .with_monitor_options(config.to_monitor_options());
    let monitor = bootstrap_monitor(options).context("Failed to bootstrap monitor")?;

    for factory in builtin_factories() {
        monitor.registry().register(factory);
    }

    monitor.start().await;
    log::info!("Monitor started");

    tokio::select! {
        name = signals.recv() => log::info!("{} received, cleaning up...", name),
        _ = lifecycle.exited() => log::info!("Exit requested (code {})", lifecycle.exit_code()),
    }

    monitor.shutdown().await;

    let code = lifecycle.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
