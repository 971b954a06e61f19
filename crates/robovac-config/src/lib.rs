//! Shared configuration for the robovac CLI.
//!
//! TOML device profiles, local key resolution (env + keyring + plaintext),
//! and translation to `robovac_core::DeviceConfig`. The CLI layers its
//! `GlobalOpts` overrides on top.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use robovac_core::DeviceConfig;

const KEYRING_SERVICE: &str = "robovac";
const LOCAL_KEY_LEN: usize = 16;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no local key configured for device '{device}'")]
    NoLocalKey { device: String },

    #[error("no device named '{name}' (configured: {available})")]
    UnknownDevice { name: String, available: String },

    #[error("no devices configured")]
    NoDevices,

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Device used when none is named on the command line.
    pub default_device: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named device profiles.
    #[serde(default)]
    pub devices: HashMap<String, DeviceProfile>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Connect and request timeout, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Heartbeat period, in seconds.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,

    /// Silence tolerated before the session is declared dead, in seconds.
    #[serde(default = "default_keepalive_timeout")]
    pub keepalive_timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            keepalive_interval: default_keepalive_interval(),
            keepalive_timeout: default_keepalive_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    5
}
fn default_keepalive_interval() -> u64 {
    9
}
fn default_keepalive_timeout() -> u64 {
    20
}

/// A named vacuum.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceProfile {
    /// Tuya device id (`gwId`).
    pub device_id: String,

    /// Hostname or IP address on the local network.
    pub host: String,

    /// TCP port. Defaults to 6668.
    pub port: Option<u16>,

    /// Friendly name for output.
    pub name: Option<String>,

    /// Local key (plaintext; prefer keyring or env var).
    pub local_key: Option<String>,

    /// Environment variable name containing the local key.
    pub local_key_env: Option<String>,

    /// Room name -> base64 room-selection payload.
    #[serde(default)]
    pub rooms: BTreeMap<String, String>,

    /// Override the default timeout, in seconds.
    pub timeout: Option<u64>,

    /// Poll the device status every N seconds while watching.
    pub poll_interval: Option<u64>,
}

impl Config {
    /// Pick a profile: the named one, else `default_device`, else the only
    /// configured device.
    pub fn device(&self, name: Option<&str>) -> Result<(&str, &DeviceProfile), ConfigError> {
        let name = match name.or(self.default_device.as_deref()) {
            Some(name) => name,
            None => match self.devices.len() {
                0 => return Err(ConfigError::NoDevices),
                1 => self
                    .devices
                    .keys()
                    .next()
                    .map(String::as_str)
                    .ok_or(ConfigError::NoDevices)?,
                _ => {
                    return Err(ConfigError::Validation {
                        field: "default_device".into(),
                        reason: "several devices configured; name one or set default_device"
                            .into(),
                    });
                }
            },
        };

        self.devices
            .get_key_value(name)
            .map(|(key, profile)| (key.as_str(), profile))
            .ok_or_else(|| ConfigError::UnknownDevice {
                name: name.into(),
                available: self.device_names().join(", "),
            })
    }

    /// Configured device names, sorted.
    pub fn device_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.devices.keys().cloned().collect();
        names.sort();
        names
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "robovac", "robovac").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("robovac");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment keys nest with a double underscore:
/// `ROBOVAC_DEFAULTS__OUTPUT=json`, `ROBOVAC_DEVICES__HALL__HOST=10.0.0.9`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ROBOVAC_").split("__"));

    let config: Config = figment.extract()?;
    debug!(path = %path.display(), devices = config.devices.len(), "config loaded");
    Ok(config)
}

/// Load config, returning a default if it can't be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(&config_path(), cfg)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Local key resolution ────────────────────────────────────────────

fn keyring_entry(device_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{device_name}/local-key"))
}

/// Resolve a device's local key (no CLI flag step).
pub fn resolve_local_key(
    profile: &DeviceProfile,
    device_name: &str,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's local_key_env → env var lookup
    if let Some(ref env_name) = profile.local_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring_entry(device_name) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref key) = profile.local_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoLocalKey {
        device: device_name.into(),
    })
}

/// Store a device's local key in the system keyring.
pub fn store_local_key(device_name: &str, key: &SecretString) -> Result<(), ConfigError> {
    validate_local_key(key)?;
    keyring_entry(device_name)?.set_password(key.expose_secret())?;
    Ok(())
}

fn validate_local_key(key: &SecretString) -> Result<(), ConfigError> {
    let len = key.expose_secret().len();
    if len == LOCAL_KEY_LEN {
        Ok(())
    } else {
        Err(ConfigError::Validation {
            field: "local_key".into(),
            reason: format!("expected {LOCAL_KEY_LEN} bytes, got {len}"),
        })
    }
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `DeviceConfig` from a profile and an already resolved local key.
pub fn profile_with_key(
    profile: &DeviceProfile,
    device_name: &str,
    defaults: &Defaults,
    local_key: SecretString,
) -> Result<DeviceConfig, ConfigError> {
    if profile.device_id.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "device_id".into(),
            reason: format!("device '{device_name}' has no device_id"),
        });
    }
    if profile.host.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: format!("device '{device_name}' has no host"),
        });
    }
    validate_local_key(&local_key)?;

    let timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));

    let mut config = DeviceConfig::new(profile.device_id.clone(), profile.host.clone(), local_key);
    if let Some(port) = profile.port {
        config.port = port;
    }
    config.name = Some(
        profile
            .name
            .clone()
            .unwrap_or_else(|| device_name.to_owned()),
    );
    config.rooms.clone_from(&profile.rooms);
    config.connect_timeout = timeout;
    config.request_timeout = timeout;
    config.keepalive_interval = Duration::from_secs(defaults.keepalive_interval);
    config.keepalive_timeout = Duration::from_secs(defaults.keepalive_timeout);
    config.poll_interval = profile.poll_interval.map(Duration::from_secs);
    Ok(config)
}
