//! `coyote.toml` loader.
//!
//! ```toml
//! [connection]
//! server_uri = "ws://127.0.0.1:5678"
//! bind_timeout = 60.0
//! heartbeat_interval = 20.0
//! pulse_dir = "pulses"
//!
//! [control]
//! max_intensity = 200
//! ```
//!
//! Every key is optional. A missing file yields the defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use coyote_session::ControlSettings;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "coyote.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub server_uri: String,
    pub scheme: String,
    pub host: String,
    pub port: String,
    pub register_timeout: f64,
    pub bind_timeout: f64,
    pub heartbeat_interval: f64,
    /// Directory of DungeonLab `.pulse` exports, relative to the config file.
    pub pulse_dir: PathBuf,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_uri: "ws://127.0.0.1:5678".to_string(),
            scheme: String::new(),
            host: String::new(),
            port: String::new(),
            register_timeout: 10.0,
            bind_timeout: 60.0,
            heartbeat_interval: 20.0,
            pulse_dir: PathBuf::from("pulses"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub max_intensity: i64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { max_intensity: 200 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub control: ControlConfig,
    /// Directory the file was loaded from; relative paths resolve against it.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Load `path`, or the defaults when it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let mut config = match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text)
                .with_context(|| format!("invalid config file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("cannot read config file {}", path.display()));
            }
        };
        config.base_dir = base_dir;
        Ok(config)
    }

    pub fn pulse_dir(&self) -> PathBuf {
        if self.connection.pulse_dir.is_absolute() {
            self.connection.pulse_dir.clone()
        } else {
            self.base_dir.join(&self.connection.pulse_dir)
        }
    }

    /// Controller settings. Blank strings count as unset.
    pub fn control_settings(&self) -> ControlSettings {
        let c = &self.connection;
        let non_empty = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };
        ControlSettings {
            server_uri: non_empty(&c.server_uri),
            scheme: non_empty(&c.scheme),
            host: c.host.trim().to_string(),
            port: c.port.trim().to_string(),
            register_timeout: c.register_timeout,
            bind_timeout: c.bind_timeout,
            heartbeat_interval: c.heartbeat_interval,
            max_intensity: self.control.max_intensity,
        }
    }
}
