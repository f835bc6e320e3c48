//! End-to-end tests for the orchestration engine.
//!
//! Every test builds the real engine through `bootstrap_monitor` with fake
//! player backends and a fake hardware volume module, then drives it through
//! the state store and the command bus the way real modules would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pi_monitor_core::{
    bootstrap_monitor, Arbitration, BootstrapOptions, ConfigFile, ConfigSource, FixedClock,
    Lifecycle, Module, ModuleContext, ModuleFactory, Monitor, MonitorOptions, MonitorResult,
    NoopLifecycle, ServerLifecycle, StateStore,
};
use serde_json::{json, Map, Value};

// ===== Test Helpers =====

/// Every command a fake module received, as `(module, verb, payload)`.
#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<(String, String, Value)>>>);

impl Journal {
    fn record(&self, module: &str, verb: &str, payload: &Value) {
        self.0
            .lock()
            .push((module.to_string(), verb.to_string(), payload.clone()));
    }

    fn verbs(&self, module: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|(m, _, _)| m == module)
            .map(|(_, v, _)| v.clone())
            .collect()
    }

    fn payloads(&self, module: &str) -> Vec<Value> {
        self.0
            .lock()
            .iter()
            .filter(|(m, _, _)| m == module)
            .map(|(_, _, p)| p.clone())
            .collect()
    }

    /// Levels applied by the hardware mixer.
    fn volumes(&self) -> Vec<u64> {
        self.0
            .lock()
            .iter()
            .filter(|(m, v, _)| m == "alsa" && v == "volume_set")
            .filter_map(|(_, _, p)| p.as_u64())
            .collect()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Kind {
    /// Playback backend: reacts to transport verbs, ignores volume and
    /// sound-effect verbs.
    Player,
    /// Local sound player: plays alerts and notifications itself.
    LocalPlayer,
    /// Hardware mixer: handles volume verbs only.
    Mixer,
    /// Never finishes a command.
    Hanging,
    /// Panics on every command.
    Exploding,
}

struct FakeFactory {
    name: &'static str,
    kind: Kind,
    journal: Journal,
    setups: Arc<AtomicUsize>,
}

impl FakeFactory {
    fn new(name: &'static str, kind: Kind, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            name,
            kind,
            journal: journal.clone(),
            setups: Arc::new(AtomicUsize::new(0)),
        })
    }
}

impl ModuleFactory for FakeFactory {
    fn name(&self) -> &str {
        self.name
    }

    fn setup(&self, ctx: &ModuleContext) -> MonitorResult<Arc<dyn Module>> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeModule {
            name: self.name,
            kind: self.kind,
            state: Arc::clone(&ctx.state),
            journal: self.journal.clone(),
        }))
    }
}

struct FakeModule {
    name: &'static str,
    kind: Kind,
    state: Arc<StateStore>,
    journal: Journal,
}

impl FakeModule {
    fn report(&self, state: &str) {
        self.state.set(&format!("{}.state", self.name), state);
    }
}

#[async_trait]
impl Module for FakeModule {
    fn name(&self) -> &str {
        self.name
    }

    fn is_player(&self) -> bool {
        matches!(self.kind, Kind::Player | Kind::LocalPlayer)
    }

    async fn start(&self) -> MonitorResult<()> {
        if self.is_player() {
            self.state
                .set(self.name, json!({ "playername": self.name, "state": "stopped" }));
        }
        Ok(())
    }

    async fn stop(&self) -> MonitorResult<()> {
        Ok(())
    }

    async fn command(&self, verb: &str, payload: Value) -> MonitorResult<bool> {
        let is_volume = verb.starts_with("volume");
        match self.kind {
            Kind::Player if is_volume || verb.starts_with("play_") => Ok(false),
            Kind::LocalPlayer if is_volume => Ok(false),
            Kind::Player | Kind::LocalPlayer => {
                self.journal.record(self.name, verb, &payload);
                match verb {
                    "play_alert" => self.report("alerting"),
                    "play_notification" => self.report("notifying"),
                    "play" => self.report("playing"),
                    "pause" => self.report("paused"),
                    "stop" => self.report("stopped"),
                    _ => {}
                }
                Ok(true)
            }
            Kind::Mixer if is_volume => {
                self.journal.record(self.name, verb, &payload);
                Ok(true)
            }
            Kind::Mixer => Ok(false),
            Kind::Hanging => {
                self.journal.record(self.name, verb, &payload);
                std::future::pending::<()>().await;
                Ok(true)
            }
            Kind::Exploding => {
                self.journal.record(self.name, verb, &payload);
                panic!("{} exploded on {}", self.name, verb)
            }
        }
    }
}

fn document(config: Value) -> Map<String, Value> {
    match config {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn options(config: ConfigSource, lifecycle: Arc<dyn Lifecycle>, hour: u32) -> BootstrapOptions {
    BootstrapOptions::new(config, lifecycle)
        .with_clock(Arc::new(FixedClock::new(hour)))
        .with_monitor_options(MonitorOptions {
            shutdown_timeout: Duration::from_millis(200),
            ..MonitorOptions::default()
        })
}

/// Builds an engine with the usual fake modules registered.
fn engine(config: Value, hour: u32, journal: &Journal) -> Arc<Monitor> {
    let monitor = bootstrap_monitor(options(
        ConfigSource::InMemory(document(config)),
        Arc::new(NoopLifecycle),
        hour,
    ))
    .unwrap();
    for (name, kind) in [
        ("spotify", Kind::Player),
        ("airplay", Kind::Player),
        ("alerts", Kind::Player),
        ("localplayer", Kind::LocalPlayer),
        ("alsa", Kind::Mixer),
    ] {
        monitor.registry().register(FakeFactory::new(name, kind, journal));
    }
    monitor
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ===== Arbitration =====

#[tokio::test]
async fn alert_interrupts_and_restores_playback() {
    let journal = Journal::default();
    let monitor = engine(
        json!({"FLUSH_ON_TAKEOVER": false, "ALERT_VOLUME": 70}),
        12,
        &journal,
    );
    monitor.start().await;
    let state = Arc::clone(monitor.state());

    monitor.submit("player", "volume_set", 60);
    eventually("initial volume", || state.get("player.volume_level") == json!(60)).await;

    state.set("spotify.state", "playing");
    eventually("spotify current", || state.get_str("player.current_player") == "spotify").await;

    state.set("alerts.state", "alerting");
    eventually("alert volume", || journal.volumes() == vec![60, 70]).await;
    eventually("spotify stopped", || journal.verbs("spotify") == vec!["stop"]).await;
    assert_eq!(state.get_str("player.current_player"), "alerts");
    assert_eq!(state.get_str("player.interrupted_player"), "spotify");

    state.set("alerts.state", "idle");
    eventually("volume restored", || journal.volumes() == vec![60, 70, 60]).await;
    eventually("spotify resumed", || state.get("player.state") == json!("playing")).await;
    assert_eq!(journal.verbs("spotify"), vec!["stop", "play"]);
    assert_eq!(state.get_str("player.current_player"), "spotify");
    assert_eq!(state.get_str("player.interrupted_player"), "");
    assert_eq!(state.get("player.volume_level"), json!(60));
    assert_eq!(
        monitor.arbiter().snapshot(),
        Arbitration::Active {
            backend: "spotify".into()
        }
    );

    monitor.shutdown().await;
}

#[tokio::test]
async fn only_one_backend_keeps_playing() {
    let journal = Journal::default();
    let monitor = engine(json!({"FLUSH_ON_TAKEOVER": false}), 12, &journal);
    monitor.start().await;
    let state = Arc::clone(monitor.state());

    state.set("spotify.state", "playing");
    eventually("spotify current", || state.get_str("player.current_player") == "spotify").await;
    state.set("airplay.state", "playing");

    eventually("airplay current", || state.get_str("player.current_player") == "airplay").await;
    eventually("spotify stopped", || state.get("spotify.state") == json!("stopped")).await;
    assert_eq!(journal.verbs("spotify"), vec!["stop"]);
    assert!(journal.verbs("airplay").is_empty());
    assert!(state.get_bool("player.power"));

    monitor.shutdown().await;
}

#[tokio::test]
async fn notification_without_playback_restores_nothing() {
    let journal = Journal::default();
    let monitor = engine(json!({"NOTIFY_VOLUME": 40}), 12, &journal);
    monitor.start().await;
    let state = Arc::clone(monitor.state());

    monitor.submit("player", "volume_set", 25);
    eventually("initial volume", || state.get("player.volume_level") == json!(25)).await;

    state.set("alerts.state", "notifying");
    eventually("notify volume", || journal.volumes() == vec![25, 40]).await;
    state.set("alerts.state", "stopped");
    eventually("volume restored", || journal.volumes() == vec![25, 40, 25]).await;

    assert_eq!(monitor.arbiter().snapshot(), Arbitration::NoActive);
    assert!(journal.verbs("spotify").is_empty());
    monitor.shutdown().await;
}

#[tokio::test]
async fn notification_before_any_volume_leaves_notify_level() {
    let journal = Journal::default();
    let monitor = engine(json!({"NOTIFY_VOLUME": 40}), 12, &journal);
    monitor.start().await;
    let state = Arc::clone(monitor.state());
    assert_eq!(state.get("player.volume_level"), Value::Null);

    state.set("alerts.state", "notifying");
    eventually("notify volume", || journal.volumes() == vec![40]).await;
    state.set("alerts.state", "stopped");
    eventually("interruption over", || {
        monitor.arbiter().snapshot() == Arbitration::NoActive
    })
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(journal.volumes(), vec![40]);
    assert_eq!(state.get("player.volume_level"), json!(40));
    monitor.shutdown().await;
}

#[tokio::test]
async fn alert_sound_falls_back_to_local_player() {
    let journal = Journal::default();
    let monitor = engine(
        json!({"FLUSH_ON_TAKEOVER": false, "ALERT_VOLUME": 70}),
        12,
        &journal,
    );
    monitor.start().await;
    let state = Arc::clone(monitor.state());

    monitor.submit("player", "volume_set", 60);
    eventually("initial volume", || state.get("player.volume_level") == json!(60)).await;
    state.set("spotify.state", "playing");
    eventually("spotify current", || state.get_str("player.current_player") == "spotify").await;

    monitor.submit("player", "play_alert", "siren.wav");
    eventually("alert volume", || journal.volumes() == vec![60, 70]).await;
    eventually("spotify stopped", || journal.verbs("spotify") == vec!["stop"]).await;
    assert_eq!(journal.verbs("localplayer"), vec!["play_alert"]);
    assert_eq!(journal.payloads("localplayer"), vec![json!("siren.wav")]);
    assert_eq!(state.get_str("player.current_player"), "localplayer");
    assert_eq!(state.get_str("player.interrupted_player"), "spotify");

    // The sound finished.
    state.set("localplayer.state", "idle");
    eventually("volume restored", || journal.volumes() == vec![60, 70, 60]).await;
    eventually("spotify resumed", || journal.verbs("spotify") == vec!["stop", "play"]).await;
    eventually("spotify current", || state.get_str("player.current_player") == "spotify").await;
    assert_eq!(state.get_str("player.interrupted_player"), "");

    monitor.shutdown().await;
}

#[tokio::test]
async fn new_backend_supersedes_alert() {
    let journal = Journal::default();
    let monitor = engine(
        json!({"FLUSH_ON_TAKEOVER": false, "ALERT_VOLUME": 70}),
        12,
        &journal,
    );
    monitor.start().await;
    let state = Arc::clone(monitor.state());

    monitor.submit("player", "volume_set", 60);
    eventually("initial volume", || state.get("player.volume_level") == json!(60)).await;
    state.set("spotify.state", "playing");
    eventually("spotify current", || state.get_str("player.current_player") == "spotify").await;
    state.set("alerts.state", "alerting");
    eventually("alert volume", || journal.volumes() == vec![60, 70]).await;
    eventually("spotify stopped", || state.get("spotify.state") == json!("stopped")).await;

    state.set("airplay.state", "playing");
    eventually("airplay current", || state.get_str("player.current_player") == "airplay").await;
    eventually("volume restored", || journal.volumes() == vec![60, 70, 60]).await;
    eventually("alert stopped", || journal.verbs("alerts") == vec!["stop"]).await;
    assert_eq!(state.get_str("player.interrupted_player"), "");
    assert_eq!(journal.verbs("spotify"), vec!["stop"]);
    assert_eq!(
        monitor.arbiter().snapshot(),
        Arbitration::Active {
            backend: "airplay".into()
        }
    );

    monitor.shutdown().await;
}

// ===== Power =====

#[tokio::test]
async fn poweroff_with_stop_halts_active_backends() {
    let journal = Journal::default();
    let monitor = engine(json!({"FLUSH_ON_TAKEOVER": false}), 12, &journal);
    monitor.start().await;
    let state = Arc::clone(monitor.state());

    state.set("spotify.state", "playing");
    eventually("powered on", || state.get_bool("player.power")).await;

    monitor.bus().execute("power", "poweroff", true).await.unwrap();
    assert_eq!(journal.verbs("spotify"), vec!["stop"]);
    assert!(journal.verbs("airplay").is_empty());
    assert_eq!(state.get("spotify.state"), json!("stopped"));
    assert!(!state.get_bool("player.power"));

    monitor.shutdown().await;
}

#[tokio::test]
async fn poweroff_alone_leaves_backends_running() {
    let journal = Journal::default();
    let monitor = engine(json!({"FLUSH_ON_TAKEOVER": false}), 12, &journal);
    monitor.start().await;
    let state = Arc::clone(monitor.state());

    state.set("spotify.state", "playing");
    eventually("powered on", || state.get_bool("player.power")).await;

    monitor.bus().execute("power", "poweroff", Value::Null).await.unwrap();
    assert!(journal.verbs("spotify").is_empty());
    assert!(!state.get_bool("player.power"));

    monitor.shutdown().await;
}

// ===== Volume limiter =====

#[tokio::test]
async fn morning_limit_lowers_loud_requests_once() {
    let journal = Journal::default();
    let monitor = engine(
        json!({"VOLUME_LIMITER": 70, "VOLUME_LIMITER_MORNING": 50}),
        3,
        &journal,
    );
    monitor.start().await;
    let state = Arc::clone(monitor.state());

    monitor.submit("player", "volume_set", 80);
    eventually("limited volume", || state.get("player.volume_level") == json!(50)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(journal.volumes(), vec![80, 50]);
    assert!(state.get_bool("player.volume_limiter"));

    monitor.bus().execute("player", "volume_up", Value::Null).await.unwrap();
    monitor.bus().execute("player", "voldown", Value::Null).await.unwrap();
    assert!(!state.get_bool("player.volume_limiter"));
    assert_eq!(journal.verbs("alsa"), vec!["volume_set", "volume_set", "volume_down"]);

    monitor.submit("player", "volume_set", 40);
    eventually("quiet volume", || state.get("player.volume_level") == json!(40)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(journal.volumes(), vec![80, 50, 40]);

    monitor.shutdown().await;
}

#[tokio::test]
async fn daytime_uses_default_limit() {
    let journal = Journal::default();
    let monitor = engine(
        json!({"VOLUME_LIMITER": 70, "VOLUME_LIMITER_MORNING": 50}),
        14,
        &journal,
    );
    monitor.start().await;
    let state = Arc::clone(monitor.state());

    monitor.submit("player", "volume_set", 65);
    eventually("volume", || state.get("player.volume_level") == json!(65)).await;
    monitor.submit("player", "volume_set", 90);
    eventually("limited volume", || state.get("player.volume_level") == json!(70)).await;
    assert_eq!(journal.volumes(), vec![65, 90, 70]);

    monitor.shutdown().await;
}

// ===== Command fan-out =====

#[tokio::test]
async fn failing_targets_do_not_block_others() {
    let journal = Journal::default();
    let monitor = engine(json!({}), 12, &journal);
    monitor
        .registry()
        .register(FakeFactory::new("stuck", Kind::Hanging, &journal));
    monitor
        .registry()
        .register(FakeFactory::new("broken", Kind::Exploding, &journal));
    monitor.start().await;

    monitor.submit("stuck", "anything", Value::Null);
    monitor.submit("broken", "anything", Value::Null);
    monitor.submit("missing", "anything", Value::Null);
    monitor.submit("alsa", "volume_set", 30);
    monitor.submit("spotify", "play", Value::Null);

    let state = Arc::clone(monitor.state());
    eventually("alsa reached", || journal.verbs("alsa") == vec!["volume_set"]).await;
    eventually("spotify playing", || state.get("spotify.state") == json!("playing")).await;
    assert_eq!(journal.verbs("broken"), vec!["anything"]);

    monitor.shutdown().await;
}

// ===== Module registry =====

#[tokio::test]
async fn concurrent_resolves_load_once() {
    let journal = Journal::default();
    let monitor = bootstrap_monitor(options(
        ConfigSource::InMemory(Map::new()),
        Arc::new(NoopLifecycle),
        12,
    ))
    .unwrap();
    let factory = FakeFactory::new("spotify", Kind::Player, &journal);
    monitor.registry().register(factory.clone());

    let resolves = (0..16).map(|_| monitor.registry().resolve("Spotify"));
    let modules = futures::future::join_all(resolves).await;

    assert!(modules.iter().all(Option::is_some));
    assert_eq!(factory.setups.load(Ordering::SeqCst), 1);
    assert_eq!(monitor.registry().loaded_names(), vec!["spotify"]);
    assert_eq!(monitor.state().get("player.players"), json!(["spotify"]));
}

#[tokio::test]
async fn disabled_module_is_never_set_up() {
    let journal = Journal::default();
    let monitor = engine(json!({"ENABLE_MODULE_AIRPLAY": false}), 12, &journal);
    monitor.start().await;

    assert!(monitor.registry().get("airplay").is_none());
    assert!(!monitor
        .state()
        .get_str_list("player.players")
        .contains(&"airplay".to_string()));
    monitor.shutdown().await;
}

// ===== Configuration =====

#[tokio::test]
async fn saveconfig_persists_changes_and_requests_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pi-monitor.json");
    std::fs::write(&path, r#"{"NOTIFY_VOLUME": 45, "MY_MODULE_KEY": "x"}"#).unwrap();

    let lifecycle = Arc::new(ServerLifecycle::new());
    let monitor = bootstrap_monitor(options(
        ConfigSource::File(ConfigFile::new(&path)),
        lifecycle.clone(),
        12,
    ))
    .unwrap();
    monitor.start().await;
    assert_eq!(monitor.config().settings().notify_volume, 45);

    monitor.bus().execute("system", "saveconfig", Value::Null).await.unwrap();
    assert!(!lifecycle.is_exiting());

    monitor.config().set("NOTIFY_VOLUME", 35);
    monitor.bus().execute("system", "saveconfig", Value::Null).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), lifecycle.exited())
        .await
        .unwrap();
    assert_eq!(lifecycle.exit_code(), 2);

    let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved["NOTIFY_VOLUME"], json!(35));
    assert_eq!(saved["MY_MODULE_KEY"], json!("x"));

    monitor.shutdown().await;
}

#[tokio::test]
async fn shutdown_powers_off_and_stops_modules() {
    let journal = Journal::default();
    let monitor = engine(json!({}), 12, &journal);
    monitor.start().await;
    let state = Arc::clone(monitor.state());

    state.set("spotify.state", "playing");
    eventually("powered on", || state.get_bool("player.power")).await;

    monitor.shutdown().await;
    assert!(!state.get_bool("player.power"));
    assert!(monitor.registry().loaded_names().is_empty());
}
