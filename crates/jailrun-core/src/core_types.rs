//! Request and outcome types shared by the pipeline and the HTTP layer

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single execution request as received from the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub script: String,
    /// Wall-clock bound in seconds, overriding the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

impl ExecutionRequest {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }
}

/// Caller-visible error classification.
///
/// The variant name is the wire `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    /// Malformed or oversized request.
    ValidationError,
    /// The user code failed while loading, running or returning its value.
    ExecutionError,
    /// The user code defines no callable `main`.
    MissingMainError,
    /// The sandbox exceeded its wall-clock bound.
    TimeoutError,
    /// The interpreter or the isolation binary could not be executed.
    EnvironmentError,
    /// The harness exited cleanly without emitting a result.
    HarnessError,
    /// The harness emitted a result that is not valid JSON.
    SerializationError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::ValidationError => "ValidationError",
            ErrorType::ExecutionError => "ExecutionError",
            ErrorType::MissingMainError => "MissingMainError",
            ErrorType::TimeoutError => "TimeoutError",
            ErrorType::EnvironmentError => "EnvironmentError",
            ErrorType::HarnessError => "HarnessError",
            ErrorType::SerializationError => "SerializationError",
        }
    }

    /// HTTP status code for this classification.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorType::ValidationError
            | ErrorType::ExecutionError
            | ErrorType::MissingMainError => 400,
            ErrorType::TimeoutError => 408,
            ErrorType::EnvironmentError => 503,
            ErrorType::HarnessError | ErrorType::SerializationError => 500,
        }
    }

    /// Server-side faults that operators need to hear about.
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            ErrorType::EnvironmentError | ErrorType::HarnessError | ErrorType::SerializationError
        )
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase reported by the harness when the user code fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarnessFailureKind {
    Read,
    Import,
    MissingMain,
    Run,
    NotJson,
}

impl HarnessFailureKind {
    /// Parses the `<kind>` token of an error line.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "read" => Some(Self::Read),
            "import" => Some(Self::Import),
            "missing_main" => Some(Self::MissingMain),
            "run" => Some(Self::Run),
            "not_json" => Some(Self::NotJson),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Import => "import",
            Self::MissingMain => "missing_main",
            Self::Run => "run",
            Self::NotJson => "not_json",
        }
    }

    /// Caller-facing message for this phase.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Read => "failed to read script",
            Self::Import => "exception during import",
            Self::MissingMain => "main() is missing or not callable",
            Self::Run => "exception during main()",
            Self::NotJson => "main() must return JSON-serializable data",
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::MissingMain => ErrorType::MissingMainError,
            _ => ErrorType::ExecutionError,
        }
    }
}

/// The `error` object of a failed outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeError {
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<HarnessFailureKind>,
}

impl OutcomeError {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            details: None,
            kind: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_kind(mut self, kind: HarnessFailureKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// What the caller gets back for every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionOutcome {
    Success { result: Value, stdout: String },
    Failure { error: OutcomeError, stdout: String },
}

impl ExecutionOutcome {
    pub fn success(result: Value, stdout: impl Into<String>) -> Self {
        Self::Success {
            result,
            stdout: stdout.into(),
        }
    }

    pub fn failure(error: OutcomeError, stdout: impl Into<String>) -> Self {
        Self::Failure {
            error,
            stdout: stdout.into(),
        }
    }

    /// Shorthand for a failure that happened before any output existed.
    pub fn rejected(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self::failure(OutcomeError::new(error_type, message), String::new())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            Self::Success { result, .. } => Some(result),
            Self::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&OutcomeError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }

    pub fn stdout(&self) -> &str {
        match self {
            Self::Success { stdout, .. } | Self::Failure { stdout, .. } => stdout,
        }
    }

    /// HTTP status code the outcome maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Success { .. } => 200,
            Self::Failure { error, .. } => error.error_type.status_code(),
        }
    }
}
