//! Request orchestration: validate, materialize, run, extract.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::JailConfig;
use crate::core_types::{ErrorType, ExecutionOutcome, ExecutionRequest, OutcomeError};
use crate::errors::{JailError, SandboxError};
use crate::extractor;
use crate::harness::SignalProtocol;
use crate::sandbox::{self, InterpreterResolver, Sandbox, SandboxCommand};
use crate::script::ScriptWorkspace;

pub const TIMEOUT_MESSAGE: &str = "time limit exceeded";
pub const ENVIRONMENT_MESSAGE: &str = "execution environment unavailable";
pub const SCRIPT_TOO_LARGE_MESSAGE: &str = "script too large";
pub const BAD_TIMEOUT_MESSAGE: &str = "'timeout' must be a positive number";

/// Anything that can turn a request into an outcome.
///
/// Never fails at the Rust level: every problem, including server-side ones,
/// is reported as a classified [`ExecutionOutcome`].
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome;
}

/// Runs Python scripts through the harness inside a [`Sandbox`].
///
/// Holds only immutable state plus the interpreter cache, so one instance
/// serves any number of concurrent requests.
#[derive(Debug)]
pub struct PythonExecutor<S: Sandbox + ?Sized = dyn Sandbox> {
    config: Arc<JailConfig>,
    sandbox: Arc<S>,
    interpreter: InterpreterResolver,
    scratch_root: Option<PathBuf>,
}

impl PythonExecutor {
    /// Builds an executor with the sandbox backend selected by `config`.
    pub fn from_config(config: Arc<JailConfig>) -> Self {
        let sandbox = sandbox::from_config(&config.sandbox);
        log::info!("Using '{}' sandbox backend", sandbox.name());
        if !sandbox.is_available() {
            log::warn!(
                "Sandbox backend '{}' is not available on this host; requests will fail with {}",
                sandbox.name(),
                ErrorType::EnvironmentError
            );
        }
        Self::new(config, sandbox)
    }
}

impl<S: Sandbox + ?Sized> PythonExecutor<S> {
    pub fn new(config: Arc<JailConfig>, sandbox: Arc<S>) -> Self {
        let interpreter = InterpreterResolver::new(config.sandbox.interpreter.clone());
        Self {
            config,
            sandbox,
            interpreter,
            scratch_root: None,
        }
    }

    pub fn with_interpreter_resolver(mut self, resolver: InterpreterResolver) -> Self {
        self.interpreter = resolver;
        self
    }

    /// Creates scratch directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn config(&self) -> &JailConfig {
        &self.config
    }

    /// Checks the request against the limits and returns the effective timeout.
    pub fn validate(&self, request: &ExecutionRequest) -> Result<Duration, JailError> {
        let limits = &self.config.limits;
        if request.script.len() > limits.max_script_bytes {
            return Err(JailError::ScriptTooLarge {
                size: request.script.len(),
                limit: limits.max_script_bytes,
            });
        }

        let requested = match request.timeout {
            None => limits.default_timeout(),
            // Clamp before converting; huge values do not fit in a Duration.
            Some(secs) if secs.is_finite() && secs >= limits.max_timeout_secs => {
                limits.max_timeout()
            }
            Some(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
            Some(_) => return Err(JailError::ValidationError(BAD_TIMEOUT_MESSAGE.to_string())),
        };
        Ok(requested.min(limits.max_timeout()))
    }

    async fn run(&self, request: &ExecutionRequest, timeout: Duration) -> ExecutionOutcome {
        let interpreter = match self.interpreter.resolve() {
            Ok(path) => path,
            Err(e) => return sandbox_failure(e),
        };

        let protocol = SignalProtocol::for_request(&self.config.protocol);
        let harness = protocol.render_harness();
        let materialized = match &self.scratch_root {
            Some(root) => ScriptWorkspace::materialize_in(root, &request.script, &harness).await,
            None => ScriptWorkspace::materialize(&request.script, &harness).await,
        };
        let workspace = match materialized {
            Ok(workspace) => workspace,
            Err(e) => {
                log::error!("Failed to prepare script workspace: {}", e);
                return ExecutionOutcome::rejected(ErrorType::EnvironmentError, ENVIRONMENT_MESSAGE);
            }
        };

        let command = SandboxCommand {
            interpreter,
            harness_path: workspace.harness_path().to_path_buf(),
            script_path: workspace.script_path().to_path_buf(),
            working_dir: workspace.root().to_path_buf(),
        };

        let outcome = match self.sandbox.run(&command, timeout).await {
            Ok(output) => {
                log::debug!(
                    "Sandbox '{}' finished in {:?} with exit code {}",
                    self.sandbox.name(),
                    output.elapsed,
                    output.exit_code
                );
                extractor::extract(&output, &protocol, self.config.limits.max_output_chars)
            }
            Err(e) => sandbox_failure(e),
        };

        if let Err(e) = workspace.close() {
            log::warn!("{}", e);
        }
        outcome
    }
}

#[async_trait]
impl<S: Sandbox + ?Sized> CodeExecutor for PythonExecutor<S> {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let timeout = match self.validate(&request) {
            Ok(timeout) => timeout,
            Err(e) => {
                log::debug!("Rejected request: {}", e);
                return validation_failure(e);
            }
        };
        log::debug!(
            "Executing script of {} bytes with timeout {:?}",
            request.script.len(),
            timeout
        );
        self.run(&request, timeout).await
    }
}

fn validation_failure(err: JailError) -> ExecutionOutcome {
    let error = match err {
        JailError::ScriptTooLarge { .. } => {
            OutcomeError::new(ErrorType::ValidationError, SCRIPT_TOO_LARGE_MESSAGE)
                .with_details(err.to_string())
        }
        JailError::ValidationError(message) => {
            OutcomeError::new(ErrorType::ValidationError, message)
        }
        other => OutcomeError::new(ErrorType::ValidationError, other.to_string()),
    };
    ExecutionOutcome::failure(error, String::new())
}

fn sandbox_failure(err: SandboxError) -> ExecutionOutcome {
    match err {
        SandboxError::TimedOut { timeout } => {
            log::info!("Script exceeded its {:?} time limit", timeout);
            ExecutionOutcome::failure(
                OutcomeError::new(ErrorType::TimeoutError, TIMEOUT_MESSAGE)
                    .with_details(format!("exceeded {} seconds", timeout.as_secs_f64())),
                String::new(),
            )
        }
        other => {
            log::error!("Execution environment failure: {}", other);
            ExecutionOutcome::rejected(ErrorType::EnvironmentError, ENVIRONMENT_MESSAGE)
        }
    }
}
