//! # Component Configuration System
//!
//! YAML-based configuration for the component lifecycle engine, with
//! environment-specific overrides and explicit validation.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use component_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration (environment auto-detected)
//! let manager = ConfigManager::load()?;
//!
//! let prefix = &manager.config().identity.prefix;
//! let concurrency = manager.config().dispatch.max_concurrent_interactions;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_COMPONENT_ID_PREFIX, DEFAULT_MAX_CONCURRENT_INTERACTIONS, MAX_CUSTOM_ID_LENGTH,
    MAX_ENCODED_ID_DIGITS,
};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring components.yaml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ComponentsConfig {
    /// External identifier encoding
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Timeout defaults and startup reconciliation
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Interaction dispatch scope
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// User-facing replies produced by the listener
    #[serde(default)]
    pub messages: MessagesConfig,

    /// Component store backend selection
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    pub prefix: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_COMPONENT_ID_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutsConfig {
    /// Timeout applied when a builder asks for the default timeout, none if unset
    #[serde(default)]
    pub default_timeout_seconds: Option<u64>,
    /// Purge ephemeral records and re-arm persisted timeouts at startup
    #[serde(default = "default_true")]
    pub reconcile_on_startup: bool,
}

impl TimeoutsConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_seconds.map(Duration::from_secs)
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: None,
            reconcile_on_startup: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    pub max_concurrent_interactions: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_interactions: DEFAULT_MAX_CONCURRENT_INTERACTIONS,
        }
    }
}

/// Replies sent back to the invoking user
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessagesConfig {
    pub component_expired: String,
    pub component_not_allowed: String,
    /// `{retry_after}` is replaced with the remaining cooldown in seconds
    pub rate_limited: String,
    pub general_error: String,
}

impl MessagesConfig {
    pub fn rate_limited_message(&self, retry_after: Duration) -> String {
        let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        self.rate_limited
            .replace("{retry_after}", &seconds.to_string())
    }
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            component_expired: "This component has expired".to_string(),
            component_not_allowed: "You are not allowed to use this component".to_string(),
            rate_limited: "You are on cooldown, try again in {retry_after} seconds".to_string(),
            general_error: "An uncaught exception occurred while handling this interaction"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(default)]
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            database_url: None,
            max_connections: 5,
        }
    }
}

impl StorageConfig {
    /// Configured URL, falling back to the `DATABASE_URL` environment variable
    pub fn resolve_database_url(&self) -> Option<String> {
        self.database_url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }
}

fn default_true() -> bool {
    true
}

impl ComponentsConfig {
    /// Validate the configuration, rejecting values the engine cannot operate with
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let prefix = &self.identity.prefix;
        if prefix.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "identity.prefix",
                "identity configuration",
            ));
        }

        if prefix.len() + MAX_ENCODED_ID_DIGITS > MAX_CUSTOM_ID_LENGTH {
            return Err(ConfigurationError::invalid_value(
                "identity.prefix",
                prefix.clone(),
                format!(
                    "prefix leaves no room for the numeric id within the {MAX_CUSTOM_ID_LENGTH} character limit"
                ),
            ));
        }

        if self.dispatch.max_concurrent_interactions == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatch.max_concurrent_interactions",
                "0",
                "must be greater than 0",
            ));
        }

        if self.timeouts.default_timeout_seconds == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "timeouts.default_timeout_seconds",
                "0",
                "omit the value to disable the default timeout",
            ));
        }

        if self.storage.backend == StorageBackend::Postgres {
            let missing_url = self
                .storage
                .resolve_database_url()
                .map_or(true, |url| url.is_empty());
            if missing_url {
                return Err(ConfigurationError::missing_required_field(
                    "storage.database_url",
                    "postgres storage configuration",
                ));
            }
            if self.storage.max_connections == 0 {
                return Err(ConfigurationError::invalid_value(
                    "storage.max_connections",
                    "0",
                    "pool size must be greater than 0",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ComponentsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.identity.prefix, DEFAULT_COMPONENT_ID_PREFIX);
        assert!(config.timeouts.reconcile_on_startup);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let mut config = ComponentsConfig::default();
        config.identity.prefix = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let mut config = ComponentsConfig::default();
        config.identity.prefix = "x".repeat(MAX_CUSTOM_ID_LENGTH);
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let mut config = ComponentsConfig::default();
        config.storage.backend = StorageBackend::Postgres;
        if std::env::var("DATABASE_URL").is_err() {
            assert!(config.validate().is_err());
        }

        config.storage.database_url = Some("postgresql://localhost/components".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rate_limited_message_rounds_up() {
        let messages = MessagesConfig::default();
        let text = messages.rate_limited_message(Duration::from_millis(1500));
        assert_eq!(text, "You are on cooldown, try again in 2 seconds");
    }
}
