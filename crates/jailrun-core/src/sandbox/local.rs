use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

use super::process::run_with_timeout;
use super::{Sandbox, SandboxCommand, SandboxOutput};
use crate::errors::SandboxError;

const LOCAL_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Runs the interpreter directly on the host.
///
/// The child gets a cleared environment, its own process group and the
/// wall-clock bound, nothing more. Scripts can read and write anything the
/// service user can.
#[derive(Debug, Clone, Default)]
pub struct LocalSandbox;

impl LocalSandbox {
    pub fn new() -> Self {
        Self
    }

    fn build_command(command: &SandboxCommand) -> Command {
        let mut cmd = Command::new(&command.interpreter);
        cmd.args(command.interpreter_args())
            .current_dir(&command.working_dir)
            .env_clear()
            .env("PATH", LOCAL_PATH)
            .env("HOME", &command.working_dir)
            .env("LANG", "C.UTF-8")
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1");
        cmd
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn run(
        &self,
        command: &SandboxCommand,
        timeout: Duration,
    ) -> Result<SandboxOutput, SandboxError> {
        log::warn!(
            "Running {} WITHOUT isolation (local sandbox backend)",
            command.script_path.display()
        );
        run_with_timeout(Self::build_command(command), timeout).await
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
