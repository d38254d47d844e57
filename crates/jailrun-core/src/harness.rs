//! The in-sandbox harness and the completion-signal protocol it speaks.
//!
//! The harness is a small Python program shipped inside this crate. It is the
//! only code that touches the untrusted source: it loads the script into a
//! fresh module namespace, calls `main()`, and reports one completion line.
//!
//! Completion lines are recognised by long, obscure prefixes. This keeps
//! accidental collisions with user output improbable, but it is not a
//! security boundary: the script runs next to the harness source and can
//! read the prefixes if it tries. A per-request suffix (see
//! [`ProtocolConfig::per_request_nonce`]) only ensures tokens differ between
//! runs.

use crate::config::ProtocolConfig;
use uuid::Uuid;

const HARNESS_TEMPLATE: &str = include_str!("../harness/harness.py");
const RESULT_PLACEHOLDER: &str = "@@RESULT_PREFIX@@";
const ERROR_PLACEHOLDER: &str = "@@ERROR_PREFIX@@";

/// The prefixes used for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalProtocol {
    result_prefix: String,
    error_prefix: String,
}

impl SignalProtocol {
    /// Builds a protocol from fixed prefixes.
    ///
    /// Prefixes are inserted into a Python string literal, so they are
    /// expected to have passed `JailConfig::validate`.
    pub fn new(result_prefix: impl Into<String>, error_prefix: impl Into<String>) -> Self {
        Self {
            result_prefix: result_prefix.into(),
            error_prefix: error_prefix.into(),
        }
    }

    /// Builds the protocol for a single request, adding a random suffix when
    /// the configuration asks for one.
    pub fn for_request(config: &ProtocolConfig) -> Self {
        if config.per_request_nonce {
            let nonce = Uuid::new_v4().simple().to_string();
            Self::new(
                format!("{}{}__", config.result_prefix, nonce),
                format!("{}{}__", config.error_prefix, nonce),
            )
        } else {
            Self::new(config.result_prefix.clone(), config.error_prefix.clone())
        }
    }

    pub fn result_prefix(&self) -> &str {
        &self.result_prefix
    }

    pub fn error_prefix(&self) -> &str {
        &self.error_prefix
    }

    /// Returns the harness source with this protocol's prefixes filled in.
    pub fn render_harness(&self) -> String {
        HARNESS_TEMPLATE
            .replace(RESULT_PLACEHOLDER, &self.result_prefix)
            .replace(ERROR_PLACEHOLDER, &self.error_prefix)
    }
}

impl From<&ProtocolConfig> for SignalProtocol {
    fn from(config: &ProtocolConfig) -> Self {
        Self::new(config.result_prefix.clone(), config.error_prefix.clone())
    }
}
