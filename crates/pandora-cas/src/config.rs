//! Account configuration loading.
//!
//! TOML is the config source.  `username` and `password` are the only
//! required fields; everything else defaults.
//!
//! ```toml
//! username = "driver@example.com"
//! password = "hunter2"
//! polling_interval = 60
//!
//! [devices]
//! "1234567890" = true
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://pro.p-on.ru";
/// Firefox-like default; some installations reject unknown clients.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(60);
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_secs(10);
pub const MAX_POLLING_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Validated configuration for one Account.
#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
    pub user_agent: String,
    pub base_url: String,
    /// Snapshot poll cadence; clamped to the 10–3600 s range on load.
    pub polling_interval: Duration,
    /// Deadline for a command's asynchronous reply.
    pub command_timeout: Duration,
    /// Per-device enable/disable overrides, keyed by device id.  Passed
    /// through to hosts; no semantics in this crate.
    pub device_overrides: HashMap<u64, bool>,
}

impl AccountConfig {
    /// A config with defaults for everything but the credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        AccountConfig {
            username: username.into(),
            password: password.into(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            polling_interval: DEFAULT_POLLING_INTERVAL,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            device_overrides: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    username: Option<String>,
    password: Option<String>,
    user_agent: Option<String>,
    base_url: Option<String>,
    polling_interval: Option<u64>,
    command_timeout: Option<u64>,
    devices: Option<HashMap<String, bool>>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load an account config from a TOML file.
pub fn load_config_from_path(path: &Path) -> Result<AccountConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load an account config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<AccountConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let username = raw
        .username
        .ok_or_else(|| ConfigError::MissingField("username".to_owned()))?;
    let password = raw
        .password
        .ok_or_else(|| ConfigError::MissingField("password".to_owned()))?;
    if username.is_empty() {
        return Err(ConfigError::InvalidValue("username must not be empty".to_owned()));
    }

    let polling_interval = raw
        .polling_interval
        .map_or(DEFAULT_POLLING_INTERVAL, |secs| {
            Duration::from_secs(secs)
                .clamp(MIN_POLLING_INTERVAL, MAX_POLLING_INTERVAL)
        });

    let command_timeout = raw
        .command_timeout
        .map_or(DEFAULT_COMMAND_TIMEOUT, Duration::from_secs);

    let mut device_overrides = HashMap::new();
    for (key, enabled) in raw.devices.unwrap_or_default() {
        let id: u64 = key.parse().map_err(|_| {
            ConfigError::InvalidValue(format!("devices key '{key}' is not a device id"))
        })?;
        device_overrides.insert(id, enabled);
    }

    Ok(AccountConfig {
        username,
        password,
        user_agent: raw.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned()),
        base_url: raw.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
        polling_interval,
        command_timeout,
        device_overrides,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}
