//! Configuration type definitions for the execution service
//!
//! Every field has a default so an empty YAML document (or no file at all)
//! yields a working configuration. Values are read once at start-up and are
//! immutable for the lifetime of the process.

use crate::errors::JailError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JailConfig {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// Size and time bounds applied to every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest accepted script, in UTF-8 bytes.
    #[serde(default = "default_max_script_bytes")]
    pub max_script_bytes: usize,
    /// Wall-clock bound used when the request does not carry one.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    /// Ceiling for per-request timeout overrides.
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: f64,
    /// Character budget for the returned program output.
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_script_bytes: default_max_script_bytes(),
            timeout_secs: default_timeout_secs(),
            max_timeout_secs: default_max_timeout_secs(),
            max_output_chars: default_max_output_chars(),
        }
    }
}

impl LimitsConfig {
    pub fn default_timeout(&self) -> Duration {
        seconds_to_duration(self.timeout_secs)
    }

    pub fn max_timeout(&self) -> Duration {
        seconds_to_duration(self.max_timeout_secs)
    }
}

/// Saturates at `Duration::MAX`; `validate` keeps configured values below it.
fn seconds_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

fn is_positive_duration(secs: f64) -> bool {
    secs > 0.0 && Duration::try_from_secs_f64(secs).is_ok()
}

/// Sandbox backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    #[default]
    Nsjail,
    /// Runs the interpreter directly on the host. No isolation.
    Local,
}

impl FromStr for SandboxBackend {
    type Err = JailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nsjail" | "strict" => Ok(SandboxBackend::Nsjail),
            "local" | "off" | "disabled" | "none" => Ok(SandboxBackend::Local),
            other => Err(JailError::ConfigError(format!(
                "Unknown sandbox backend '{}' (expected 'nsjail' or 'local')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub backend: SandboxBackend,
    /// nsjail binary, absolute or looked up on `PATH`.
    #[serde(default = "default_nsjail_path")]
    pub nsjail_path: PathBuf,
    /// nsjail protobuf config passed with `--config`.
    #[serde(default = "default_nsjail_config")]
    pub nsjail_config: Option<PathBuf>,
    /// Pass `--quiet` so nsjail's own log lines stay out of stderr.
    #[serde(default = "default_true")]
    pub nsjail_quiet: bool,
    #[serde(default = "default_tmpfs_mounts")]
    pub tmpfs_mounts: Vec<String>,
    /// Extra arguments placed before the `--` separator.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Interpreter override; when unset the conventional locations are probed.
    #[serde(default)]
    pub interpreter: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::default(),
            nsjail_path: default_nsjail_path(),
            nsjail_config: default_nsjail_config(),
            nsjail_quiet: true,
            tmpfs_mounts: default_tmpfs_mounts(),
            extra_args: Vec::new(),
            interpreter: None,
        }
    }
}

/// Completion-signal prefixes shared by the harness and the extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_result_prefix")]
    pub result_prefix: String,
    #[serde(default = "default_error_prefix")]
    pub error_prefix: String,
    /// Append a random per-request suffix to both prefixes.
    #[serde(default = "default_true")]
    pub per_request_nonce: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            result_prefix: default_result_prefix(),
            error_prefix: default_error_prefix(),
            per_request_nonce: true,
        }
    }
}

fn default_max_script_bytes() -> usize { 200_000 }
fn default_timeout_secs() -> f64 { 10.0 }
fn default_max_timeout_secs() -> f64 { 60.0 }
fn default_max_output_chars() -> usize { 20_000 }
fn default_nsjail_path() -> PathBuf { PathBuf::from("nsjail") }
fn default_nsjail_config() -> Option<PathBuf> { Some(PathBuf::from("/app/nsjail.cfg")) }
fn default_tmpfs_mounts() -> Vec<String> { vec!["/tmp".to_string()] }
fn default_result_prefix() -> String { "__JAILRUN_RESULT_9f4c2e7a1b__".to_string() }
fn default_error_prefix() -> String { "__JAILRUN_ERROR_5d8b3f0c6e__".to_string() }
fn default_true() -> bool { true }

fn is_valid_prefix(prefix: &str) -> bool {
    prefix.len() >= 8 && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl JailConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), JailError> {
        if self.limits.max_script_bytes == 0 {
            return Err(JailError::ConfigError("limits.max_script_bytes must be greater than 0".to_string()));
        }

        if !is_positive_duration(self.limits.timeout_secs) {
            return Err(JailError::ConfigError(
                "limits.timeout_secs must be a positive number of seconds".to_string(),
            ));
        }

        if !is_positive_duration(self.limits.max_timeout_secs) {
            return Err(JailError::ConfigError(
                "limits.max_timeout_secs must be a positive number of seconds".to_string(),
            ));
        }

        if self.limits.timeout_secs > self.limits.max_timeout_secs {
            return Err(JailError::ConfigError(format!(
                "limits.timeout_secs ({}) cannot exceed limits.max_timeout_secs ({})",
                self.limits.timeout_secs, self.limits.max_timeout_secs
            )));
        }

        if self.limits.max_output_chars == 0 {
            return Err(JailError::ConfigError("limits.max_output_chars must be greater than 0".to_string()));
        }

        if self.sandbox.backend == SandboxBackend::Nsjail
            && self.sandbox.nsjail_path.as_os_str().is_empty()
        {
            return Err(JailError::ConfigError("sandbox.nsjail_path cannot be empty".to_string()));
        }

        for (name, prefix) in [
            ("result_prefix", &self.protocol.result_prefix),
            ("error_prefix", &self.protocol.error_prefix),
        ] {
            if !is_valid_prefix(prefix) {
                return Err(JailError::ConfigError(format!(
                    "protocol.{} must be at least 8 characters of [A-Za-z0-9_]",
                    name
                )));
            }
        }

        if self.protocol.result_prefix.contains(&self.protocol.error_prefix)
            || self.protocol.error_prefix.contains(&self.protocol.result_prefix)
        {
            return Err(JailError::ConfigError(
                "protocol prefixes must not contain one another".to_string(),
            ));
        }

        Ok(())
    }
}
