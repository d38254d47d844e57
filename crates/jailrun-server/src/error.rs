//! Error types for the HTTP layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use jailrun_core::{ErrorType, ExecutionOutcome, JailError};
use thiserror::Error;

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors raised before a request reaches the executor, or by the server itself.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed request
    #[error("{0}")]
    InvalidRequest(String),

    /// Request body or script over the configured size
    #[error("{0}")]
    PayloadTooLarge(String),

    /// Server configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error bubbling up from the execution pipeline setup
    #[error(transparent)]
    Core(#[from] JailError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn payload_too_large(msg: impl Into<String>) -> Self {
        Self::PayloadTooLarge(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::PayloadTooLarge(_) => 413,
            ServerError::Config(_) | ServerError::Core(_) | ServerError::Io(_) => 500,
        }
    }

    /// Wire classification, shared with execution outcomes.
    pub fn error_type(&self) -> ErrorType {
        match self {
            ServerError::InvalidRequest(_) | ServerError::PayloadTooLarge(_) => {
                ErrorType::ValidationError
            }
            ServerError::Config(_) | ServerError::Core(_) | ServerError::Io(_) => {
                ErrorType::EnvironmentError
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        }
        let body = ExecutionOutcome::rejected(self.error_type(), self.to_string());
        (status, Json(body)).into_response()
    }
}
