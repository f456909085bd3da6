//! Configuration management
//!
//! This module handles loading and parsing configuration for sessionward.
//! Configuration can be loaded from:
//! - sessionward.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Environment name, used as the first segment of every key
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Key-value store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,
    /// Two-factor configuration
    #[serde(default)]
    pub two_factor: TwoFactorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            store: StoreConfig::default(),
            session: SessionConfig::default(),
            two_factor: TwoFactorConfig::default(),
        }
    }
}

fn default_environment() -> String {
    "dev".to_string()
}

/// Key-value store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store driver (memory or redis)
    #[serde(default)]
    pub driver: StoreDriver,
    /// Redis connection URL (required for the redis driver)
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Seconds allowed for establishing a backend connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            driver: StoreDriver::default(),
            redis_url: None,
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    5
}

/// Store driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreDriver {
    /// In-process store (default)
    #[default]
    Memory,
    /// Redis
    Redis,
}

/// Sliding-expiration session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Key segment for session hashes
    #[serde(default = "default_session_prefix")]
    pub prefix: String,
    /// Sliding window renewed on every access, in seconds
    #[serde(default = "default_sliding_expiration")]
    pub sliding_expiration_seconds: u64,
    /// Hard cutoff set once at creation, in seconds (none when absent)
    #[serde(default)]
    pub absolute_expiration_seconds: Option<u64>,
    /// Reserved hash field holding the sliding deadline
    #[serde(default = "default_expiration_field")]
    pub expiration_field: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prefix: default_session_prefix(),
            sliding_expiration_seconds: default_sliding_expiration(),
            absolute_expiration_seconds: None,
            expiration_field: default_expiration_field(),
        }
    }
}

fn default_session_prefix() -> String {
    "session".to_string()
}

fn default_sliding_expiration() -> u64 {
    30 * 60 // 30 minutes
}

fn default_expiration_field() -> String {
    "expiration".to_string()
}

impl SessionConfig {
    /// Sliding window as a duration
    pub fn sliding_expiration(&self) -> Duration {
        Duration::from_secs(self.sliding_expiration_seconds)
    }

    /// Absolute expiration as a duration
    pub fn absolute_expiration(&self) -> Option<Duration> {
        self.absolute_expiration_seconds.map(Duration::from_secs)
    }
}

/// Two-factor verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorConfig {
    /// Key segment for pending request lists
    #[serde(default = "default_two_factor_prefix")]
    pub prefix: String,
    /// Cooldown between two codes on the same channel, in seconds
    #[serde(default = "default_throttle_seconds")]
    pub throttle_seconds: u64,
    /// Number of digits in generated codes
    #[serde(default = "default_code_digits")]
    pub code_digits: u32,
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            prefix: default_two_factor_prefix(),
            throttle_seconds: default_throttle_seconds(),
            code_digits: default_code_digits(),
        }
    }
}

fn default_two_factor_prefix() -> String {
    "2fa".to_string()
}

fn default_throttle_seconds() -> u64 {
    60
}

fn default_code_digits() -> u32 {
    crate::services::DEFAULT_CODE_DIGITS
}

/// Allowed range for `code_digits`; ten digits no longer fit in a `u32`
pub const CODE_DIGITS_RANGE: std::ops::RangeInclusive<u32> = 4..=9;

/// Upper bound for every duration setting (100 years)
pub const MAX_DURATION_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        // Handle empty file - return defaults
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - SESSIONWARD_ENVIRONMENT
    /// - SESSIONWARD_STORE_DRIVER
    /// - SESSIONWARD_STORE_REDIS_URL
    /// - SESSIONWARD_STORE_CONNECT_TIMEOUT_SECONDS
    /// - SESSIONWARD_SESSION_PREFIX
    /// - SESSIONWARD_SESSION_SLIDING_EXPIRATION_SECONDS
    /// - SESSIONWARD_SESSION_ABSOLUTE_EXPIRATION_SECONDS
    /// - SESSIONWARD_TWO_FACTOR_PREFIX
    /// - SESSIONWARD_TWO_FACTOR_THROTTLE_SECONDS
    /// - SESSIONWARD_TWO_FACTOR_CODE_DIGITS
    ///
    /// The result is validated after overrides are applied.
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        if let Ok(environment) = std::env::var("SESSIONWARD_ENVIRONMENT") {
            self.environment = environment;
        }

        // Store configuration
        if let Ok(driver) = std::env::var("SESSIONWARD_STORE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "memory" => self.store.driver = StoreDriver::Memory,
                "redis" => self.store.driver = StoreDriver::Redis,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(redis_url) = std::env::var("SESSIONWARD_STORE_REDIS_URL") {
            self.store.redis_url = Some(redis_url);
        }
        if let Ok(timeout) = std::env::var("SESSIONWARD_STORE_CONNECT_TIMEOUT_SECONDS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                self.store.connect_timeout_seconds = timeout;
            }
        }

        // Session configuration
        if let Ok(prefix) = std::env::var("SESSIONWARD_SESSION_PREFIX") {
            self.session.prefix = prefix;
        }
        if let Ok(sliding) = std::env::var("SESSIONWARD_SESSION_SLIDING_EXPIRATION_SECONDS") {
            if let Ok(sliding) = sliding.parse::<u64>() {
                self.session.sliding_expiration_seconds = sliding;
            }
        }
        if let Ok(absolute) = std::env::var("SESSIONWARD_SESSION_ABSOLUTE_EXPIRATION_SECONDS") {
            if let Ok(absolute) = absolute.parse::<u64>() {
                self.session.absolute_expiration_seconds = Some(absolute);
            }
        }

        // Two-factor configuration
        if let Ok(prefix) = std::env::var("SESSIONWARD_TWO_FACTOR_PREFIX") {
            self.two_factor.prefix = prefix;
        }
        if let Ok(throttle) = std::env::var("SESSIONWARD_TWO_FACTOR_THROTTLE_SECONDS") {
            if let Ok(throttle) = throttle.parse::<u64>() {
                self.two_factor.throttle_seconds = throttle;
            }
        }
        if let Ok(digits) = std::env::var("SESSIONWARD_TWO_FACTOR_CODE_DIGITS") {
            if let Ok(digits) = digits.parse::<u32>() {
                self.two_factor.code_digits = digits;
            }
        }
    }

    /// Check values that parse fine but cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.sliding_expiration_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "session.sliding_expiration_seconds must be greater than zero".to_string(),
            ));
        }
        if self.session.absolute_expiration_seconds == Some(0) {
            return Err(ConfigError::ValidationError(
                "session.absolute_expiration_seconds must be greater than zero when set".to_string(),
            ));
        }
        for (name, value) in [
            ("session.sliding_expiration_seconds", Some(self.session.sliding_expiration_seconds)),
            ("session.absolute_expiration_seconds", self.session.absolute_expiration_seconds),
            ("two_factor.throttle_seconds", Some(self.two_factor.throttle_seconds)),
        ] {
            if value.is_some_and(|v| v > MAX_DURATION_SECONDS) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must not exceed {} seconds",
                    name, MAX_DURATION_SECONDS
                )));
            }
        }
        if !CODE_DIGITS_RANGE.contains(&self.two_factor.code_digits) {
            return Err(ConfigError::ValidationError(format!(
                "two_factor.code_digits must be between {} and {}, got {}",
                CODE_DIGITS_RANGE.start(),
                CODE_DIGITS_RANGE.end(),
                self.two_factor.code_digits
            )));
        }
        if self.store.driver == StoreDriver::Redis && self.store.redis_url.is_none() {
            return Err(ConfigError::ValidationError(
                "store.redis_url is required when store.driver is 'redis'".to_string(),
            ));
        }
        for (name, value) in [
            ("environment", &self.environment),
            ("session.prefix", &self.session.prefix),
            ("two_factor.prefix", &self.two_factor.prefix),
        ] {
            if value.is_empty() || !value.is_ascii() {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be a non-empty ASCII string",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for all config tests that modify environment variables.
// Both `tests` and `property_tests` modules use this to prevent race conditions.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ENV_VARS: &[&str] = &[
    "SESSIONWARD_ENVIRONMENT",
    "SESSIONWARD_STORE_DRIVER",
    "SESSIONWARD_STORE_REDIS_URL",
    "SESSIONWARD_STORE_CONNECT_TIMEOUT_SECONDS",
    "SESSIONWARD_SESSION_PREFIX",
    "SESSIONWARD_SESSION_SLIDING_EXPIRATION_SECONDS",
    "SESSIONWARD_SESSION_ABSOLUTE_EXPIRATION_SECONDS",
    "SESSIONWARD_TWO_FACTOR_PREFIX",
    "SESSIONWARD_TWO_FACTOR_THROTTLE_SECONDS",
    "SESSIONWARD_TWO_FACTOR_CODE_DIGITS",
];

#[cfg(test)]
fn clear_env() {
    for name in ENV_VARS {
        std::env::remove_var(name);
    }
}
