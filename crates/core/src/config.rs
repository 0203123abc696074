//! Configuration management for kracli
//!
//! A single TOML file holds the login credentials, the cached session token
//! and a few optional tuning sections. A missing file behaves like an empty
//! one; the file is only rewritten when a new session token is obtained.

use crate::error::{Error, Result};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration directory name
const CONFIG_DIR: &str = "kracli";

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Default object API root
pub const DEFAULT_API_URL: &str = "https://api.kra.sk/api";

/// Default resumable upload root
pub const DEFAULT_UPLOAD_URL: &str = "https://upload.kra.sk/upload/";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<LoginConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<EndpointsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Login credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Cached session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub id: String,
}

/// Service endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_api_url")]
    pub api: String,
    #[serde(default = "default_upload_url")]
    pub upload: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            api: default_api_url(),
            upload: default_upload_url(),
        }
    }
}

/// Transfer tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Upload chunk size in MiB, 0 uploads the whole file in one request
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: i64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_mb: default_chunk_size_mb(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_upload_url() -> String {
    DEFAULT_UPLOAD_URL.to_string()
}

fn default_chunk_size_mb() -> i64 {
    10
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl ConfigFile {
    /// Endpoints, falling back to the public service
    pub fn endpoints(&self) -> EndpointsConfig {
        self.endpoints.clone().unwrap_or_default()
    }

    /// Configured upload chunk size in MiB
    pub fn chunk_size_mb(&self) -> i64 {
        self.transfer
            .as_ref()
            .map(|t| t.chunk_size_mb)
            .unwrap_or_else(default_chunk_size_mb)
    }

    /// Cached session token, if any
    pub fn session_id(&self) -> Option<&str> {
        self.session
            .as_ref()
            .map(|s| s.id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Store a session token, creating the section if absent
    pub fn set_session_id(&mut self, id: impl Into<String>) {
        self.session = Some(SessionConfig { id: id.into() });
    }
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let home = home_dir().ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;
    Ok(home.join(".config").join(CONFIG_DIR))
}

/// Get the default configuration file path
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE))
}

/// Load configuration from `path`. A missing file yields an empty configuration.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        Error::InvalidConfig(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    let config: ConfigFile = toml::from_str(&content).map_err(|e| {
        Error::InvalidConfig(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;

    Ok(config)
}

/// Save configuration to `path`
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }
    }

    let content = toml::to_string_pretty(config)?;

    fs::write(path, content).map_err(|e| {
        Error::Config(format!("Failed to write config file: {}", e))
    })?;

    // Credentials live in this file: owner read/write only
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }

    Ok(())
}
