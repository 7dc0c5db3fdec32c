//! Configuration loading and management.
//!
//! Configuration is loaded with the following precedence:
//! 1. Environment variables (`REPROMP_*`)
//! 2. Config file (`~/.repromp/config.toml`)
//! 3. Defaults

use crate::error::{Error, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Main configuration struct.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Local storage configuration.
    pub storage: StorageConfig,

    /// Hosted backend configuration.
    pub remote: RemoteConfig,

    /// Access gate configuration.
    pub gate: GateConfig,
}

/// Local storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding local storage.
    pub path: PathBuf,

    /// Maximum bytes of local storage; 0 means unlimited.
    pub quota_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_repromp_home(),
            quota_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Hosted backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the hosted project; empty disables the remote backend.
    pub url: String,

    /// Public API key sent with every request.
    pub anon_key: String,

    /// Number of history entries to load.
    pub history_limit: usize,

    /// HTTP request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            history_limit: 50,
            timeout_seconds: 30,
        }
    }
}

impl RemoteConfig {
    /// Check if a hosted backend is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// Access gate configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Hex SHA-256 of the access password; empty disables the gate.
    pub password_sha256: String,

    /// Failed attempts before lockout.
    pub max_attempts: u32,

    /// Lockout duration in seconds.
    pub block_seconds: i64,

    /// How long a successful unlock lasts, in hours.
    pub session_hours: i64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            password_sha256: String::new(),
            max_attempts: 5,
            block_seconds: 300,
            session_hours: 24,
        }
    }
}

impl GateConfig {
    /// Check if the gate is enabled (a password digest is set).
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.password_sha256.trim().is_empty()
    }
}

/// Get the default repromp home directory.
fn default_repromp_home() -> PathBuf {
    dirs::home_dir().map_or_else(|| PathBuf::from(".repromp"), |h| h.join(".repromp"))
}

/// Load configuration with precedence: env vars → file → defaults.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
pub fn load_config() -> Result<Config> {
    let mut config = Config::default();

    let config_path = get_config_path();
    if config_path.exists() {
        let contents = fs::read_to_string(&config_path).map_err(Error::Storage)?;
        config = toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))?;
    }

    apply_env_overrides(&mut config, |key| env::var(key).ok());

    Ok(config)
}

/// Get the path to the config file.
fn get_config_path() -> PathBuf {
    if let Ok(path) = env::var("REPROMP_CONFIG") {
        return PathBuf::from(path);
    }

    if let Ok(home) = env::var("REPROMP_HOME") {
        return PathBuf::from(home).join("config.toml");
    }

    default_repromp_home().join("config.toml")
}

/// Apply environment variable overrides to config.
///
/// Unparseable numeric values are ignored.
fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    // Storage
    if let Some(path) = var("REPROMP_STORAGE_PATH") {
        config.storage.path = PathBuf::from(path);
    } else if let Some(home) = var("REPROMP_HOME") {
        config.storage.path = PathBuf::from(home);
    }

    if let Some(quota) = var("REPROMP_QUOTA_BYTES").and_then(|v| v.parse().ok()) {
        config.storage.quota_bytes = quota;
    }

    // Remote
    if let Some(url) = var("REPROMP_REMOTE_URL") {
        config.remote.url = url;
    }

    if let Some(key) = var("REPROMP_ANON_KEY") {
        config.remote.anon_key = key;
    }

    if let Some(limit) = var("REPROMP_HISTORY_LIMIT").and_then(|v| v.parse().ok()) {
        config.remote.history_limit = limit;
    }

    // Gate
    if let Some(digest) = var("REPROMP_GATE_PASSWORD_SHA256") {
        config.gate.password_sha256 = digest;
    }

    if let Some(max) = var("REPROMP_GATE_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
        config.gate.max_attempts = max;
    }
}
