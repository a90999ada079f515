//! Configuration Vault – reads `~/.flicknest/config.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! `FLICKNEST_*` environment variables are applied on top (see
//! [`apply_env_overrides`]).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flicknest_middleware::MqttSettings;
use serde::{Deserialize, Serialize};

/// Hub configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// MQTT broker host.
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_keep_alive_secs: u64,
    pub mqtt_client_id: String,
    /// Device → hub gesture reports.
    pub telemetry_topic: String,
    /// Hub → device state pushes.
    pub control_topic: String,

    /// SQLite database holding the symbol table.
    pub db_path: PathBuf,
    /// Legacy `{"symbols": {...}}` document imported into an empty store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_document: Option<PathBuf>,

    /// Listen host for both the HTTP and WebSocket servers.
    pub http_host: String,
    pub http_port: u16,
    pub ws_port: u16,

    /// Seconds between MQTT reconnect checks.
    pub reconnect_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_keep_alive_secs: 60,
            mqtt_client_id: "flicknest-hub".to_string(),
            telemetry_topic: "esp/data".to_string(),
            control_topic: "esp/control".to_string(),
            db_path: PathBuf::from("flicknest.db"),
            legacy_document: None,
            http_host: "0.0.0.0".to_string(),
            http_port: 5000,
            ws_port: 5001,
            reconnect_interval_secs: 30,
        }
    }
}

impl Config {
    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            client_id: self.mqtt_client_id.clone(),
            keep_alive: Duration::from_secs(self.mqtt_keep_alive_secs),
            telemetry_topic: self.telemetry_topic.clone(),
            control_topic: self.control_topic.clone(),
            ..MqttSettings::default()
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs.max(1))
    }
}

/// `$FLICKNEST_CONFIG`, or `~/.flicknest/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("FLICKNEST_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".flicknest").join("config.toml")
}

/// Load the effective configuration: file (or defaults) plus env overrides.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Read the config file at `path`. Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `FLICKNEST_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FLICKNEST_MQTT_HOST` | `mqtt_host` |
/// | `FLICKNEST_MQTT_PORT` | `mqtt_port` |
/// | `FLICKNEST_MQTT_KEEP_ALIVE_SECS` | `mqtt_keep_alive_secs` |
/// | `FLICKNEST_TELEMETRY_TOPIC` | `telemetry_topic` |
/// | `FLICKNEST_CONTROL_TOPIC` | `control_topic` |
/// | `FLICKNEST_DB_PATH` | `db_path` |
/// | `FLICKNEST_HTTP_HOST` | `http_host` |
/// | `FLICKNEST_HTTP_PORT` | `http_port` |
/// | `FLICKNEST_WS_PORT` | `ws_port` |
/// | `FLICKNEST_RECONNECT_INTERVAL_SECS` | `reconnect_interval_secs` |
///
/// Numeric values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("FLICKNEST_MQTT_HOST") {
        cfg.mqtt_host = v;
    }
    if let Ok(v) = std::env::var("FLICKNEST_MQTT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.mqtt_port = port;
    }
    if let Ok(v) = std::env::var("FLICKNEST_MQTT_KEEP_ALIVE_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.mqtt_keep_alive_secs = secs;
    }
    if let Ok(v) = std::env::var("FLICKNEST_TELEMETRY_TOPIC") {
        cfg.telemetry_topic = v;
    }
    if let Ok(v) = std::env::var("FLICKNEST_CONTROL_TOPIC") {
        cfg.control_topic = v;
    }
    if let Ok(v) = std::env::var("FLICKNEST_DB_PATH") {
        cfg.db_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("FLICKNEST_HTTP_HOST") {
        cfg.http_host = v;
    }
    if let Ok(v) = std::env::var("FLICKNEST_HTTP_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.http_port = port;
    }
    if let Ok(v) = std::env::var("FLICKNEST_WS_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.ws_port = port;
    }
    if let Ok(v) = std::env::var("FLICKNEST_RECONNECT_INTERVAL_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.reconnect_interval_secs = secs;
    }
}
