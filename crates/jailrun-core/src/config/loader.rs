//! Configuration loader for YAML files and environment overrides
//!
//! Resolution order: built-in defaults, then the YAML file (if any), then
//! environment variables. The result is validated before it is returned.

use crate::config::types::*;
use crate::errors::JailError;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Environment variables consulted by [`ConfigLoader::apply_env_overrides`].
pub const ENV_MAX_SCRIPT_BYTES: &str = "JAILRUN_MAX_SCRIPT_BYTES";
pub const ENV_TIMEOUT_SECS: &str = "JAILRUN_TIMEOUT_SECS";
pub const ENV_MAX_TIMEOUT_SECS: &str = "JAILRUN_MAX_TIMEOUT_SECS";
pub const ENV_MAX_OUTPUT_CHARS: &str = "JAILRUN_MAX_OUTPUT_CHARS";
pub const ENV_PYTHON: &str = "JAILRUN_PYTHON";
pub const ENV_SANDBOX: &str = "JAILRUN_SANDBOX";
pub const ENV_NSJAIL_PATH: &str = "NSJAIL_PATH";
pub const ENV_NSJAIL_CONFIG: &str = "NSJAIL_CONFIG";
pub const ENV_NSJAIL_MODE: &str = "NSJAIL_MODE";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from an optional YAML file plus the process environment
    pub async fn load(path: Option<&Path>) -> Result<JailConfig, JailError> {
        let mut config = match path {
            Some(path) => Self::read_file(path).await?,
            None => JailConfig::default(),
        };
        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, without environment overrides
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<JailConfig, JailError> {
        let config = Self::read_file(path.as_ref()).await?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<JailConfig, JailError> {
        let config = Self::parse(content)?;
        config.validate()?;
        Ok(config)
    }

    async fn read_file(path: &Path) -> Result<JailConfig, JailError> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            JailError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        log::debug!("Loaded configuration file {}", path.display());
        Self::parse(&content)
    }

    fn parse(content: &str) -> Result<JailConfig, JailError> {
        if content.trim().is_empty() {
            return Ok(JailConfig::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Overlay environment variables onto `config`.
    ///
    /// `lookup` abstracts the environment so callers can pass a fixed map.
    pub fn apply_env_overrides<F>(config: &mut JailConfig, lookup: F) -> Result<(), JailError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_SCRIPT_BYTES) {
            config.limits.max_script_bytes = parse_env(ENV_MAX_SCRIPT_BYTES, &value)?;
        }
        if let Some(value) = lookup(ENV_TIMEOUT_SECS) {
            config.limits.timeout_secs = parse_env(ENV_TIMEOUT_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_TIMEOUT_SECS) {
            config.limits.max_timeout_secs = parse_env(ENV_MAX_TIMEOUT_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_OUTPUT_CHARS) {
            config.limits.max_output_chars = parse_env(ENV_MAX_OUTPUT_CHARS, &value)?;
        }
        if let Some(value) = non_empty(lookup(ENV_PYTHON)) {
            config.sandbox.interpreter = Some(PathBuf::from(value));
        }
        // NSJAIL_MODE is the deployment switch; JAILRUN_SANDBOX wins when both are set.
        if let Some(value) = non_empty(lookup(ENV_NSJAIL_MODE)) {
            config.sandbox.backend = value.parse()?;
        }
        if let Some(value) = non_empty(lookup(ENV_SANDBOX)) {
            config.sandbox.backend = value.parse()?;
        }
        if let Some(value) = non_empty(lookup(ENV_NSJAIL_PATH)) {
            config.sandbox.nsjail_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_NSJAIL_CONFIG) {
            let value = value.trim();
            config.sandbox.nsjail_config = if value.is_empty() {
                None
            } else {
                Some(PathBuf::from(value))
            };
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, JailError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| {
        JailError::ConfigError(format!("Invalid value '{}' for {}: {}", value, key, e))
    })
}
