//! Error types for the execution pipeline
//!
//! Two families live here. `JailError` covers the service's own faults
//! (configuration, scratch storage, request validation) and `SandboxError`
//! covers what can go wrong while launching and waiting on the isolated
//! process. Failures of the untrusted code itself are not Rust errors at all:
//! they are classified into an `ExecutionOutcome` by the extractor.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JailError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Script too large: {size} bytes exceeds the {limit} byte limit")]
    ScriptTooLarge { size: usize, limit: usize },
    #[error("Workspace error: {0}")]
    WorkspaceError(String),
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for JailError {
    fn from(err: std::io::Error) -> Self {
        JailError::IoError(err.to_string())
    }
}

impl From<serde_yaml::Error> for JailError {
    fn from(err: serde_yaml::Error) -> Self {
        JailError::ConfigError(format!("Failed to parse YAML config: {}", err))
    }
}

// Specific error for the sandbox invoker
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Execution environment unavailable ({program}): {reason}")]
    EnvironmentUnavailable { program: String, reason: String },
    #[error("Sandbox execution timed out after {timeout:?}")]
    TimedOut { timeout: Duration },
    #[error("I/O error during sandbox operation: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to capture sandbox output: {0}")]
    CaptureFailed(String),
}

impl SandboxError {
    pub fn environment_unavailable(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvironmentUnavailable {
            program: program.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts_to_jail_error() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: JailError = io.into();
        assert_eq!(err, JailError::IoError("disk full".to_string()));
    }

    #[test]
    fn script_too_large_message_names_both_sizes() {
        let err = JailError::ScriptTooLarge { size: 12, limit: 10 };
        let msg = err.to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains("10"));
    }
}
