//! Decoding of `POST /execute` bodies.

use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use jailrun_core::executor::{BAD_TIMEOUT_MESSAGE, SCRIPT_TOO_LARGE_MESSAGE};
use jailrun_core::ExecutionRequest;
use serde_json::Value;

use crate::error::{Result, ServerError};

pub const CONTENT_TYPE_MESSAGE: &str = "Content-Type must be application/json";
pub const SCRIPT_TYPE_MESSAGE: &str = "'script' must be a string";

/// Whether the request declares a JSON body. Parameters such as `charset`
/// are ignored.
pub fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Validates headers and body and builds the request for the executor.
pub fn parse_execute_request(
    headers: &HeaderMap,
    body: &[u8],
    max_script_bytes: usize,
) -> Result<ExecutionRequest> {
    if !is_json_content_type(headers) {
        return Err(ServerError::invalid_request(CONTENT_TYPE_MESSAGE));
    }

    let payload: Value = serde_json::from_slice(body).map_err(|e| {
        log::debug!("Rejecting undecodable body: {}", e);
        ServerError::invalid_request(SCRIPT_TYPE_MESSAGE)
    })?;

    let script = payload
        .get("script")
        .and_then(Value::as_str)
        .ok_or_else(|| ServerError::invalid_request(SCRIPT_TYPE_MESSAGE))?;

    let timeout = match payload.get("timeout") {
        None | Some(Value::Null) => None,
        Some(value) => match value.as_f64() {
            Some(secs) if secs.is_finite() && secs > 0.0 => Some(secs),
            _ => return Err(ServerError::invalid_request(BAD_TIMEOUT_MESSAGE)),
        },
    };

    if script.len() > max_script_bytes {
        return Err(ServerError::payload_too_large(SCRIPT_TOO_LARGE_MESSAGE));
    }

    let mut request = ExecutionRequest::new(script);
    request.timeout = timeout;
    Ok(request)
}
