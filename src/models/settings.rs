//! Runtime configuration snapshot.
//!
//! The core never watches the config file: a `Settings` value is loaded
//! once and handed to the Mapper and Player at construction, so gameplay
//! state never observes a half-applied configuration change.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::time::{NANOS_PER_MS, Nanos};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown key code name: {0}")]
    UnknownKeyCode(String),
    #[error("invalid controller mapping syntax: {0}")]
    InvalidControllerBinding(String),
    #[error("missing key binding: {0}")]
    MissingBinding(String),
}

/// Input-related options.
///
/// Keyboard entries map `kb_<style>_<lane>` names to physical key labels
/// (`"KeyZ"`, `"ShiftLeft"`, ...). Controller entries map the matching
/// `con_*` names to `"<guid-hash-hex>;<duplicate>;<index>"` bindings, with
/// `"None"` meaning unbound.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsSettings {
    /// Minimum gap between inputs on one lane, in milliseconds.
    pub debounce_duration: i64,
    /// How long a turntable may stay still before it counts as stopped,
    /// in milliseconds.
    pub turntable_stop_timeout: i64,
    pub keys: HashMap<String, String>,
    pub buttons: HashMap<String, String>,
    pub axes: HashMap<String, String>,
}

/// Default keyboard layout: bottom-row spread for P1, mirrored for P2.
const DEFAULT_KEYS: &[(&str, &str)] = &[
    ("kb_5k_1", "KeyZ"),
    ("kb_5k_2", "KeyS"),
    ("kb_5k_3", "KeyX"),
    ("kb_5k_4", "KeyD"),
    ("kb_5k_5", "KeyC"),
    ("kb_5k_s", "ShiftLeft"),
    ("kb_7k_1", "KeyZ"),
    ("kb_7k_2", "KeyS"),
    ("kb_7k_3", "KeyX"),
    ("kb_7k_4", "KeyD"),
    ("kb_7k_5", "KeyC"),
    ("kb_7k_6", "KeyF"),
    ("kb_7k_7", "KeyV"),
    ("kb_7k_s", "ShiftLeft"),
    ("kb_10k_p1_1", "KeyZ"),
    ("kb_10k_p1_2", "KeyS"),
    ("kb_10k_p1_3", "KeyX"),
    ("kb_10k_p1_4", "KeyD"),
    ("kb_10k_p1_5", "KeyC"),
    ("kb_10k_p1_s", "ShiftLeft"),
    ("kb_10k_p2_1", "KeyM"),
    ("kb_10k_p2_2", "KeyK"),
    ("kb_10k_p2_3", "Comma"),
    ("kb_10k_p2_4", "KeyL"),
    ("kb_10k_p2_5", "Period"),
    ("kb_10k_p2_s", "ShiftRight"),
    ("kb_14k_p1_1", "KeyZ"),
    ("kb_14k_p1_2", "KeyS"),
    ("kb_14k_p1_3", "KeyX"),
    ("kb_14k_p1_4", "KeyD"),
    ("kb_14k_p1_5", "KeyC"),
    ("kb_14k_p1_6", "KeyF"),
    ("kb_14k_p1_7", "KeyV"),
    ("kb_14k_p1_s", "ShiftLeft"),
    ("kb_14k_p2_1", "KeyM"),
    ("kb_14k_p2_2", "KeyK"),
    ("kb_14k_p2_3", "Comma"),
    ("kb_14k_p2_4", "KeyL"),
    ("kb_14k_p2_5", "Period"),
    ("kb_14k_p2_6", "Semicolon"),
    ("kb_14k_p2_7", "Slash"),
    ("kb_14k_p2_s", "ShiftRight"),
];

impl Default for ControlsSettings {
    fn default() -> Self {
        Self {
            debounce_duration: 5,
            turntable_stop_timeout: 100,
            keys: DEFAULT_KEYS
                .iter()
                .map(|&(name, code)| (name.to_string(), code.to_string()))
                .collect(),
            buttons: HashMap::new(),
            axes: HashMap::new(),
        }
    }
}

impl ControlsSettings {
    pub fn debounce_ns(&self) -> Nanos {
        self.debounce_duration * NANOS_PER_MS
    }

    pub fn turntable_stop_timeout_ns(&self) -> Nanos {
        self.turntable_stop_timeout * NANOS_PER_MS
    }
}

/// Gameplay tuning. `scroll_speed` and `judgment_timeout` only affect
/// rendering; `note_offset` shifts every input timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameplaySettings {
    pub scroll_speed: f64,
    /// Milliseconds added to every input timestamp.
    pub note_offset: i64,
    /// How long a judgment stays on screen, in milliseconds.
    pub judgment_timeout: i64,
}

impl Default for GameplaySettings {
    fn default() -> Self {
        Self {
            scroll_speed: 1.0,
            note_offset: 0,
            judgment_timeout: 1000,
        }
    }
}

impl GameplaySettings {
    pub fn note_offset_ns(&self) -> Nanos {
        self.note_offset * NANOS_PER_MS
    }
}

/// The full configuration snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub controls: ControlsSettings,
    pub gameplay: GameplaySettings,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}
