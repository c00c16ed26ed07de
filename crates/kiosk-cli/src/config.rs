//! Reads and writes `~/.kiosk/config.toml`.

use kiosk_types::{DeviceIdentity, KioskError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Bearer token for the remote channel.  Wiped from memory on drop and never
/// printed.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct ChannelToken(String);

impl ChannelToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ChannelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            f.write_str("<not set>")
        } else {
            f.write_str("<redacted>")
        }
    }
}

/// Persisted agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket URL of the remote flag service.
    #[serde(default = "default_channel_url")]
    pub channel_url: String,

    /// Path of this device's kiosk flag on the remote service.
    #[serde(default = "default_flag_path")]
    pub flag_path: String,

    /// Device-admin component that holds lock-task privilege.
    #[serde(default = "default_component")]
    pub component: String,

    /// Package allowed to run while pinned.
    #[serde(default = "default_package")]
    pub package: String,

    /// Seconds to wait for the grant dialog; `0` waits indefinitely.
    #[serde(default = "default_grant_timeout_secs")]
    pub grant_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub request_privilege_on_start: bool,

    /// Whether the simulated platform reports this app as device owner.
    #[serde(default = "default_true")]
    pub simulate_device_owner: bool,

    #[serde(default, skip_serializing_if = "ChannelToken::is_empty")]
    pub channel_token: ChannelToken,
}

fn default_channel_url() -> String {
    "ws://localhost:9400".to_string()
}
fn default_flag_path() -> String {
    "kiosk_mode".to_string()
}
fn default_component() -> String {
    "com.example.crew/.KioskAdminReceiver".to_string()
}
fn default_package() -> String {
    "com.example.crew".to_string()
}
fn default_grant_timeout_secs() -> u64 {
    120
}
fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel_url: default_channel_url(),
            flag_path: default_flag_path(),
            component: default_component(),
            package: default_package(),
            grant_timeout_secs: default_grant_timeout_secs(),
            request_privilege_on_start: true,
            simulate_device_owner: true,
            channel_token: ChannelToken::default(),
        }
    }
}

impl Config {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.component.clone(), self.package.clone())
    }

    pub fn grant_timeout(&self) -> Option<Duration> {
        (self.grant_timeout_secs > 0).then(|| Duration::from_secs(self.grant_timeout_secs))
    }
}

/// Return the path to `~/.kiosk/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".kiosk").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, KioskError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, KioskError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        KioskError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| KioskError::Config(format!("failed to parse config: {e}")))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `KIOSK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `KIOSK_CHANNEL_URL` | `channel_url` |
/// | `KIOSK_FLAG_PATH` | `flag_path` |
/// | `KIOSK_GRANT_TIMEOUT_SECS` | `grant_timeout_secs` |
/// | `KIOSK_CHANNEL_TOKEN` | `channel_token` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("KIOSK_CHANNEL_URL") {
        cfg.channel_url = v;
    }
    if let Ok(v) = std::env::var("KIOSK_FLAG_PATH") {
        cfg.flag_path = v;
    }
    if let Ok(v) = std::env::var("KIOSK_GRANT_TIMEOUT_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.grant_timeout_secs = secs;
    }
    if let Ok(v) = std::env::var("KIOSK_CHANNEL_TOKEN") {
        cfg.channel_token = ChannelToken::new(v);
    }
}

/// Save the config to disk, creating `~/.kiosk/` if necessary.
pub fn save(cfg: &Config) -> Result<(), KioskError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), KioskError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| KioskError::Config(format!("failed to create config directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                KioskError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| KioskError::Config(format!("failed to serialize config: {e}")))?;
    let write_err =
        |e: std::io::Error| KioskError::Config(format!("failed to write config at {}: {e}", path.display()));
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}
