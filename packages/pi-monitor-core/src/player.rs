//! Playback state and player metadata types.
//!
//! Every backend owns one namespace in the state store shaped like
//! [`PlayerMetadata`]. The aggregate `player` namespace has the same shape
//! plus the arbitration bookkeeping fields.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Playback state reported by a backend.
///
/// Variants are grouped by interruption priority. A higher [`priority`]
/// preempts a lower one.
///
/// [`priority`]: PlaybackState::priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaybackState {
    /// Empty or unrecognised state string.
    #[default]
    Unknown,
    Off,
    Idle,
    Stopped,
    Paused,
    Loading,
    Playing,
    /// Voice assistant is capturing speech.
    Listening,
    Notifying,
    Alerting,
    /// Voice assistant is answering.
    Speaking,
}

impl PlaybackState {
    /// Returns the canonical state string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::Off => "off",
            Self::Idle => "idle",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Loading => "loading",
            Self::Playing => "playing",
            Self::Listening => "listening",
            Self::Notifying => "notifying",
            Self::Alerting => "alerting",
            Self::Speaking => "speaking",
        }
    }

    /// Interruption priority: `off < idle < playing < notifying < alerting`.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Off => 1,
            Self::Idle | Self::Stopped | Self::Paused => 2,
            Self::Loading | Self::Playing | Self::Listening => 3,
            Self::Notifying => 4,
            Self::Alerting | Self::Speaking => 5,
        }
    }

    /// True for states that should hold the audio output.
    #[must_use]
    pub fn is_playing(self) -> bool {
        self.priority() >= 3
    }

    /// True for notification, alert and voice-assistant states that
    /// temporarily preempt normal playback.
    #[must_use]
    pub fn is_interrupt(self) -> bool {
        matches!(
            self,
            Self::Listening | Self::Notifying | Self::Alerting | Self::Speaking
        )
    }

    /// True for states where the backend has released the output.
    #[must_use]
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Off | Self::Idle | Self::Stopped | Self::Paused)
    }

    /// True when an interrupter in this state no longer holds the output.
    /// A cleared (`Unknown`) state counts as a release.
    #[must_use]
    pub fn releases_output(self) -> bool {
        self.is_idle() || self == Self::Unknown
    }

    /// Reads a state from a store value. Anything unrecognised is `Unknown`.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        value
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for PlaybackState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" => Ok(Self::Unknown),
            "off" | "standby" => Ok(Self::Off),
            "idle" => Ok(Self::Idle),
            "stopped" => Ok(Self::Stopped),
            "paused" => Ok(Self::Paused),
            "loading" => Ok(Self::Loading),
            "playing" => Ok(Self::Playing),
            "listening" => Ok(Self::Listening),
            "notifying" | "notification" => Ok(Self::Notifying),
            "alerting" | "alert" => Ok(Self::Alerting),
            "speaking" => Ok(Self::Speaking),
            other => Err(format!("unknown playback state: {other}")),
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PlaybackState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PlaybackState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or_default())
    }
}

/// Metadata published by one backend (and mirrored onto `player`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlayerMetadata {
    pub state: PlaybackState,
    pub playername: String,
    pub artist: String,
    pub album: String,
    pub title: String,
    pub cover_url: String,
    /// Volume level, 0-100.
    pub volume_level: u8,
    pub repeat: bool,
    pub shuffle: bool,
}

impl PlayerMetadata {
    /// Creates empty metadata for a backend with the given display name.
    pub fn new(playername: impl Into<String>) -> Self {
        Self {
            playername: playername.into(),
            ..Default::default()
        }
    }

    /// Reads metadata from a store node, tolerating missing or odd fields.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let Value::Object(fields) = value else {
            return Self::default();
        };
        let text = |key: &str| {
            fields
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            state: fields
                .get("state")
                .map(PlaybackState::from_value)
                .unwrap_or_default(),
            playername: text("playername"),
            artist: text("artist"),
            album: text("album"),
            title: text("title"),
            cover_url: text("cover_url"),
            volume_level: fields
                .get("volume_level")
                .and_then(Value::as_f64)
                .map(|v| v.clamp(0.0, 100.0) as u8)
                .unwrap_or(0),
            repeat: fields.get("repeat").and_then(Value::as_bool).unwrap_or(false),
            shuffle: fields.get("shuffle").and_then(Value::as_bool).unwrap_or(false),
        }
    }

    /// Converts to a field map suitable for a batched store update.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Initial value of the aggregate `player` namespace.
#[must_use]
pub fn aggregate_player_node() -> Value {
    let mut node = PlayerMetadata::new("").to_map();
    // No volume is known until a mixer or backend reports one.
    node.insert("volume_level".into(), Value::Null);
    node.insert("power".into(), Value::Bool(false));
    node.insert("current_player".into(), Value::String(String::new()));
    node.insert("players".into(), Value::Array(Vec::new()));
    node.insert("interrupted_player".into(), Value::String(String::new()));
    node.insert("volume_limiter".into(), Value::Bool(false));
    Value::Object(node)
}
