use gatelink_signal::Mode;
use serde::Deserialize;
use std::path::Path;
use std::{fs, io};

// --- Error Type ---
#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(serde_json::Error),
    ParseToml(toml::de::Error),
    Validation(String),
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseToml(err)
    }
}

// --- Enums for Choices ---
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Memory,
    File,
    WebSocket,
}

// --- Configuration Sections ---

#[derive(Deserialize, Debug, Clone)]
pub struct ChannelConfig {
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub options: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ReceiveConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_cadence_ms")]
    pub cadence_ms: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_poll_interval_ms() -> u64 {
    500
}
fn default_cadence_ms() -> u64 {
    300
}
fn default_history_limit() -> usize {
    10
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            cadence_ms: default_cadence_ms(),
            history_limit: default_history_limit(),
        }
    }
}

// --- Top-Level Config Struct ---

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub role: Role,
    #[serde(default = "default_speed")]
    pub speed: u8,
    #[serde(default = "default_mode")]
    pub default_mode: Mode,
    /// Possessed terminals corrupt outgoing text before transmitting.
    #[serde(default)]
    pub possessed: bool,
    pub channel: ChannelConfig,
    #[serde(default)]
    pub receive: ReceiveConfig,
}

fn default_speed() -> u8 {
    3
}
fn default_mode() -> Mode {
    Mode::Morse
}

// --- Transport Options ---

#[derive(Deserialize, Debug, Clone)]
pub struct FileOptions {
    #[serde(default = "default_slot_path")]
    pub path: String,
}

fn default_slot_path() -> String {
    "transmission.slot".to_string()
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            path: default_slot_path(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct WebSocketOptions {
    #[serde(default = "default_ws_host")]
    pub host: String,
    #[serde(default = "default_ws_port")]
    pub port: u16,
    /// When set, this context dials out instead of serving.
    #[serde(default)]
    pub connect: Option<String>,
}

fn default_ws_host() -> String {
    "127.0.0.1".to_string()
}
fn default_ws_port() -> u16 {
    8765
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        Self {
            host: default_ws_host(),
            port: default_ws_port(),
            connect: None,
        }
    }
}

// --- Helper Methods ---

impl ChannelConfig {
    pub fn get_file_options(&self) -> FileOptions {
        if let Some(value) = &self.options {
            if let Ok(options) = serde_json::from_value(value.clone()) {
                return options;
            }
        }
        FileOptions::default()
    }

    pub fn get_websocket_options(&self) -> WebSocketOptions {
        if let Some(value) = &self.options {
            if let Ok(options) = serde_json::from_value(value.clone()) {
                return options;
            }
        }
        WebSocketOptions::default()
    }
}

// --- Loading Function ---

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: Config = if path.extension().and_then(|e| e.to_str()) == Some("toml") {
        toml::from_str(&content)?
    } else {
        serde_json::from_str(&content)?
    };

    // Basic Validation
    if !(1..=5).contains(&config.speed) {
        return Err(ConfigError::Validation(
            "Speed must be between 1 and 5.".to_string(),
        ));
    }
    if config.role == Role::Sender && config.default_mode == Mode::All {
        return Err(ConfigError::Validation(
            "'all' is a receive-side presentation, not a transmit mode.".to_string(),
        ));
    }
    if config.receive.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "Poll interval cannot be zero.".to_string(),
        ));
    }
    if config.receive.cadence_ms == 0 {
        return Err(ConfigError::Validation(
            "Replay cadence cannot be zero.".to_string(),
        ));
    }

    Ok(config)
}
