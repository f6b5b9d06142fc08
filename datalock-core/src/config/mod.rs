//! Configuration management
//!
//! Settings for the lock-key manager: where identities are stored, how long
//! derived keys stay cached, which relying party passkeys belong to, and
//! how logs are formatted. Loaded from the environment or a TOML file.

use crate::core_lockkey::DEFAULT_CACHE_LIFETIME;
use crate::core_storage::StorageType;
use crate::logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity storage configuration
    pub storage: StorageConfig,

    /// Lock-key cache configuration
    pub cache: CacheConfig,

    /// Relying party and account defaults for passkey ceremonies
    pub relying_party: RelyingPartyConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Identity storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend the identity registry is kept in
    pub storage_type: StorageType,

    /// Root directory for persistent backends
    pub data_dir: PathBuf,
}

/// Lock-key cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum time a derived lock-key stays cached
    #[serde(with = "humantime_serde")]
    pub lifetime: Duration,
}

/// Relying party configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelyingPartyConfig {
    /// Relying party ID (a domain)
    pub id: String,

    /// Human-readable relying party name
    pub name: String,

    /// Account name used when registering without an explicit username
    pub default_username: String,

    /// Display name used when registering without an explicit one
    pub default_display_name: String,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: LogLevel,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Idb,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lifetime: DEFAULT_CACHE_LIFETIME,
        }
    }
}

impl Default for RelyingPartyConfig {
    fn default() -> Self {
        Self {
            id: "localhost".to_string(),
            name: "Local Data Lock".to_string(),
            default_username: "local-user".to_string(),
            default_display_name: "Local User".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Recognised variables:
    /// `DATALOCK_STORAGE_TYPE`, `DATALOCK_DATA_DIR`,
    /// `DATALOCK_CACHE_LIFETIME_MS`, `DATALOCK_RP_ID`, `DATALOCK_RP_NAME`,
    /// `DATALOCK_LOG_LEVEL`, `DATALOCK_LOG_JSON`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Storage config
        if let Some(storage_type) = lookup("DATALOCK_STORAGE_TYPE") {
            config.storage.storage_type =
                storage_type
                    .parse()
                    .map_err(|e: crate::core_storage::StorageError| ConfigError::InvalidValue {
                        key: "DATALOCK_STORAGE_TYPE",
                        reason: e.to_string(),
                    })?;
        }
        if let Some(data_dir) = lookup("DATALOCK_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }

        // Cache config
        if let Some(lifetime) = lookup("DATALOCK_CACHE_LIFETIME_MS") {
            let ms: u64 = lifetime.parse().map_err(|e| ConfigError::InvalidValue {
                key: "DATALOCK_CACHE_LIFETIME_MS",
                reason: format!("{}", e),
            })?;
            config.cache.lifetime = Duration::from_millis(ms);
        }

        // Relying party config
        if let Some(id) = lookup("DATALOCK_RP_ID") {
            config.relying_party.id = id;
        }
        if let Some(name) = lookup("DATALOCK_RP_NAME") {
            config.relying_party.name = name;
        }

        // Logging config
        if let Some(level) = lookup("DATALOCK_LOG_LEVEL") {
            config.logging.level = level.parse().map_err(|e: crate::logging::LoggingError| {
                ConfigError::InvalidValue {
                    key: "DATALOCK_LOG_LEVEL",
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(json) = lookup("DATALOCK_LOG_JSON") {
            config.logging.json_format = json.parse().map_err(|e| ConfigError::InvalidValue {
                key: "DATALOCK_LOG_JSON",
                reason: format!("{}", e),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relying_party.id.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "relying_party.id must not be empty".to_string(),
            ));
        }

        if self.relying_party.name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "relying_party.name must not be empty".to_string(),
            ));
        }

        if self.relying_party.default_username.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "relying_party.default_username must not be empty".to_string(),
            ));
        }

        if self.storage.storage_type.is_persistent()
            && self.storage.data_dir.as_os_str().is_empty()
        {
            return Err(ConfigError::ValidationFailed(format!(
                "storage.data_dir is required for {} storage",
                self.storage.storage_type
            )));
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents).map_err(|source| ConfigError::FileWrite {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }
}
