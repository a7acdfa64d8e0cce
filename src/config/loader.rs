//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles YAML file discovery,
//! environment detection and merging of environment sections over the base document.

use super::error::{ConfigResult, ConfigurationError};
use super::ComponentsConfig;
use crate::constants::{CONFIG_FILE_NAME, KNOWN_ENVIRONMENTS};
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ConfigManager {
    config: ComponentsConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for testing without modifying global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = environment,
            prefix = %config.identity.prefix,
            backend = ?config.storage.backend,
            "⚙️ Component configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: ComponentsConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        }))
    }

    pub fn config(&self) -> &ComponentsConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect current environment from environment variables
    fn detect_environment() -> String {
        env::var("COMPONENTS_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// Read a configuration file, refusing oversized or non-regular files
    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                "configuration file exceeds the 1MB limit",
            ));
        }

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                "directory or special file",
                "configuration path must point to a regular file",
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let candidates = [
            config_directory.join(CONFIG_FILE_NAME),
            config_directory.join("components.yml"),
        ];

        candidates
            .iter()
            .find(|path| path.is_file())
            .cloned()
            .ok_or_else(|| ConfigurationError::config_file_not_found(candidates.to_vec()))
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<ComponentsConfig> {
        let config_file = Self::find_config_file(config_directory)?;
        let yaml_content = Self::read_config_file_safely(&config_file)?;

        Self::parse_with_environment(&yaml_content, environment)
            .map_err(|e| match e {
                ConfigurationError::InvalidYaml { error, .. } => {
                    ConfigurationError::invalid_yaml(config_file.display().to_string(), error)
                }
                other => other,
            })
    }

    /// Parse a YAML document and apply the overrides of the given environment section
    pub fn parse_with_environment(
        yaml_content: &str,
        environment: &str,
    ) -> ConfigResult<ComponentsConfig> {
        let mut yaml_data: YamlValue = serde_yaml::from_str(yaml_content)
            .map_err(|e| ConfigurationError::invalid_yaml("<inline>", e))?;

        if let Some(env_overrides) = yaml_data
            .get(YamlValue::String(environment.to_string()))
            .cloned()
        {
            match env_overrides {
                YamlValue::Mapping(_) => {
                    debug!("Applying environment-specific overrides for: {}", environment);
                    Self::merge_yaml_values(&mut yaml_data, env_overrides)?;
                }
                YamlValue::Null => {}
                _ => {
                    return Err(ConfigurationError::config_merge_error(format!(
                        "section '{environment}' must be a mapping"
                    )))
                }
            }
        }

        if let YamlValue::Mapping(ref mut map) = yaml_data {
            for known in KNOWN_ENVIRONMENTS {
                map.remove(YamlValue::String((*known).to_string()));
            }
            map.remove(YamlValue::String(environment.to_string()));
        }

        serde_yaml::from_value(yaml_data).map_err(|e| {
            ConfigurationError::invalid_yaml(
                "<inline>",
                format!("Failed to deserialize configuration: {e}"),
            )
        })
    }

    /// Recursively merge YAML values (environment overrides into base config)
    fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) -> ConfigResult<()> {
        match (&mut *base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    if let Some(existing_value) = base_map.get_mut(&key) {
                        Self::merge_yaml_values(existing_value, value)?;
                    } else {
                        base_map.insert(key, value);
                    }
                }
            }
            (base_ref, override_val) => {
                *base_ref = override_val;
            }
        }
        Ok(())
    }
}
