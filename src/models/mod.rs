//! Configuration and other plain data consumed by the core.

pub mod settings;

pub use settings::{ConfigError, ControlsSettings, GameplaySettings, Settings};
