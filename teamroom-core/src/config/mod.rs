//! Configuration management for teamroom
//!
//! Configuration comes from built-in defaults, an optional TOML file, and
//! `TEAMROOM_<SECTION>_<KEY>` environment overrides, in that order.

use crate::logging::{LogConfig, LogLevel};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod error;

/// Longest accepted invite lifetime (ten years)
pub const MAX_INVITE_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub invites: InviteConfig,
    pub groups: GroupConfig,
    pub operations: OperationConfig,
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Maximum pooled connections
    pub pool_size: u32,

    /// How long a statement waits on a locked database
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,

    /// Enable JSON formatting
    pub json_format: bool,

    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

/// Invite configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InviteConfig {
    /// How long a code stays redeemable
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Number of decimal digits per code
    pub code_length: usize,
}

/// Group and room defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Create the standard rooms (Hangout, Co-Work, ...) with every new group
    pub seed_default_rooms: bool,

    pub default_room_capacity: u32,

    pub default_zone: String,
}

/// Per-operation limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationConfig {
    /// Deadline applied to each call made through the async facade
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("teamroom.db"),
            pool_size: 8,
            busy_timeout: Duration::from_secs(5),
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

impl LoggingConfig {
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig::new(self.level)
            .with_timestamp(self.with_timestamp)
            .with_target(self.with_target)
            .json_format(self.json_format)
    }
}

impl Default for InviteConfig {
    fn default() -> Self {
        Self {
            ttl: crate::core_membership::invite::DEFAULT_INVITE_TTL,
            code_length: crate::core_membership::invite::DEFAULT_CODE_LEN,
        }
    }
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            seed_default_rooms: false,
            default_room_capacity: crate::core_membership::room::DEFAULT_ROOM_CAPACITY,
            default_zone: crate::core_membership::room::DEFAULT_DEPLOYMENT_ZONE.to_string(),
        }
    }
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10),
        }
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", key, e)))
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(value.trim())
        .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", key, e)))
}

impl Config {
    /// Load configuration from environment variables on top of defaults
    ///
    /// Environment variables follow the pattern: TEAMROOM_<SECTION>_<KEY>
    /// Example: TEAMROOM_STORE_DATABASE_PATH=/var/lib/teamroom.db
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// File (when given), then environment overrides, then validation
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TEAMROOM_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Store config
        if let Some(path) = lookup("TEAMROOM_STORE_DATABASE_PATH") {
            self.store.database_path = PathBuf::from(path);
        }
        if let Some(v) = lookup("TEAMROOM_STORE_POOL_SIZE") {
            self.store.pool_size = parse_value("TEAMROOM_STORE_POOL_SIZE", &v)?;
        }
        if let Some(v) = lookup("TEAMROOM_STORE_BUSY_TIMEOUT") {
            self.store.busy_timeout = parse_duration("TEAMROOM_STORE_BUSY_TIMEOUT", &v)?;
        }

        // Logging config
        if let Some(v) = lookup("TEAMROOM_LOGGING_LEVEL") {
            self.logging.level = parse_value("TEAMROOM_LOGGING_LEVEL", &v)?;
        }
        if let Some(v) = lookup("TEAMROOM_LOGGING_JSON_FORMAT") {
            self.logging.json_format = parse_value("TEAMROOM_LOGGING_JSON_FORMAT", &v)?;
        }

        // Invite config
        if let Some(v) = lookup("TEAMROOM_INVITES_TTL") {
            self.invites.ttl = parse_duration("TEAMROOM_INVITES_TTL", &v)?;
        }
        if let Some(v) = lookup("TEAMROOM_INVITES_CODE_LENGTH") {
            self.invites.code_length = parse_value("TEAMROOM_INVITES_CODE_LENGTH", &v)?;
        }

        // Group config
        if let Some(v) = lookup("TEAMROOM_GROUPS_SEED_DEFAULT_ROOMS") {
            self.groups.seed_default_rooms = parse_value("TEAMROOM_GROUPS_SEED_DEFAULT_ROOMS", &v)?;
        }
        if let Some(v) = lookup("TEAMROOM_GROUPS_DEFAULT_ROOM_CAPACITY") {
            self.groups.default_room_capacity = parse_value("TEAMROOM_GROUPS_DEFAULT_ROOM_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("TEAMROOM_GROUPS_DEFAULT_ZONE") {
            self.groups.default_zone = v;
        }

        if let Some(v) = lookup("TEAMROOM_OPERATIONS_DEFAULT_TIMEOUT") {
            self.operations.default_timeout = parse_duration("TEAMROOM_OPERATIONS_DEFAULT_TIMEOUT", &v)?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.pool_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "store.pool_size must be greater than 0".to_string(),
            ));
        }
        if self.store.database_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "store.database_path must not be empty".to_string(),
            ));
        }

        if self.invites.ttl.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "invites.ttl must be greater than 0".to_string(),
            ));
        }
        if self.invites.ttl > MAX_INVITE_TTL {
            return Err(ConfigError::ValidationFailed(format!(
                "invites.ttl must be at most {:?}, got {:?}",
                MAX_INVITE_TTL, self.invites.ttl
            )));
        }
        if !(6..=32).contains(&self.invites.code_length) {
            return Err(ConfigError::ValidationFailed(format!(
                "invites.code_length must be between 6 and 32, got {}",
                self.invites.code_length
            )));
        }

        if self.groups.default_room_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "groups.default_room_capacity must be greater than 0".to_string(),
            ));
        }
        if self.groups.default_zone.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "groups.default_zone must not be empty".to_string(),
            ));
        }

        if self.operations.default_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "operations.default_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}
