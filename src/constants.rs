//! # System Constants
//!
//! Identifier limits, configuration defaults and log operation names shared
//! across the component engine.

/// Prefix marking an external identifier as owned by this component system
pub const DEFAULT_COMPONENT_ID_PREFIX: &str = "BotComponents-";

/// Maximum length of a custom identifier accepted by the platform
pub const MAX_CUSTOM_ID_LENGTH: usize = 100;

/// Digits needed to print any positive `i64`
pub const MAX_ENCODED_ID_DIGITS: usize = 19;

pub const DEFAULT_MAX_CONCURRENT_INTERACTIONS: usize = 256;

pub const CONFIG_FILE_NAME: &str = "components.yaml";

pub const KNOWN_ENVIRONMENTS: &[&str] = &["development", "test", "production"];

/// Operation names used in structured component logs
pub mod operations {
    pub const CREATE: &str = "create";
    pub const CREATE_GROUP: &str = "create_group";
    pub const DELETE: &str = "delete";
    pub const RESET_TIMEOUT: &str = "reset_timeout";
    pub const TIMEOUT_FIRED: &str = "timeout_fired";
    pub const PURGE_EPHEMERAL: &str = "purge_ephemeral";
}
