//! Sandbox invocation for the harness process.
//!
//! The isolation mechanism itself is opaque to the pipeline: a [`Sandbox`]
//! only has to run the interpreter on the harness within a wall-clock bound
//! and hand back the exit code and both captured streams.
//!
//! ## Implementations
//!
//! - **NsjailSandbox**: wraps the interpreter in `nsjail`
//! - **LocalSandbox**: runs the interpreter directly. Does NOT isolate; meant
//!   for development and tests

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{SandboxBackend, SandboxConfig};
use crate::errors::SandboxError;

pub mod interpreter;
pub mod local;
pub mod nsjail;
pub mod process;

pub use interpreter::{resolve_interpreter, InterpreterResolver, DEFAULT_INTERPRETER_CANDIDATES};
pub use local::LocalSandbox;
pub use nsjail::NsjailSandbox;
pub use process::run_with_timeout;

/// What to run inside the sandbox for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxCommand {
    pub interpreter: PathBuf,
    pub harness_path: PathBuf,
    pub script_path: PathBuf,
    pub working_dir: PathBuf,
}

impl SandboxCommand {
    /// Arguments passed to the interpreter: the harness, then the script it loads.
    pub fn interpreter_args(&self) -> Vec<OsString> {
        vec![
            self.harness_path.clone().into_os_string(),
            self.script_path.clone().into_os_string(),
        ]
    }
}

/// Exit status and captured streams of a finished sandbox run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl SandboxOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a [`SandboxCommand`] under some isolation mechanism.
///
/// Implementations spawn exactly one child process tree per call, must kill
/// the whole tree when `timeout` expires and report that as
/// [`SandboxError::TimedOut`], and must report a missing isolation or
/// interpreter binary as [`SandboxError::EnvironmentUnavailable`]. Any exit
/// code is returned as-is.
#[async_trait]
pub trait Sandbox: Send + Sync + std::fmt::Debug {
    async fn run(
        &self,
        command: &SandboxCommand,
        timeout: Duration,
    ) -> Result<SandboxOutput, SandboxError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the isolation mechanism can be used on this host.
    fn is_available(&self) -> bool {
        true
    }
}

/// Builds the sandbox selected by the configuration.
pub fn from_config(config: &SandboxConfig) -> Arc<dyn Sandbox> {
    match config.backend {
        SandboxBackend::Nsjail => Arc::new(NsjailSandbox::new(config.clone())),
        SandboxBackend::Local => Arc::new(LocalSandbox::new()),
    }
}
