use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use super::process::run_with_timeout;
use super::{Sandbox, SandboxCommand, SandboxOutput};
use crate::config::SandboxConfig;
use crate::errors::SandboxError;

/// Runs the harness under `nsjail`.
///
/// Namespaces, mounts and resource limits come from the nsjail config file;
/// this type only adds the per-request pieces (scratch tmpfs, working
/// directory and the interpreter invocation).
#[derive(Debug, Clone)]
pub struct NsjailSandbox {
    config: SandboxConfig,
}

impl NsjailSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Full argument list passed to the nsjail binary.
    pub fn build_args(&self, command: &SandboxCommand) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(config_file) = &self.config.nsjail_config {
            args.push("--config".to_string());
            args.push(config_file.display().to_string());
        }
        if self.config.nsjail_quiet {
            args.push("--quiet".to_string());
        }
        for mount in &self.config.tmpfs_mounts {
            args.push("--tmpfsmount".to_string());
            args.push(mount.clone());
        }
        args.push("--cwd".to_string());
        args.push(command.working_dir.display().to_string());
        args.extend(self.config.extra_args.iter().cloned());

        args.push("--".to_string());
        args.push(command.interpreter.display().to_string());
        args.push(command.harness_path.display().to_string());
        args.push(command.script_path.display().to_string());
        args
    }

    fn build_command(&self, command: &SandboxCommand) -> Command {
        let mut cmd = Command::new(&self.config.nsjail_path);
        cmd.args(self.build_args(command))
            .current_dir(&command.working_dir);
        cmd
    }

    fn binary_exists(path: &Path) -> bool {
        if path.components().count() == 1 && !path.is_absolute() {
            which::which(path).is_ok()
        } else {
            path.is_file()
        }
    }
}

#[async_trait]
impl Sandbox for NsjailSandbox {
    async fn run(
        &self,
        command: &SandboxCommand,
        timeout: Duration,
    ) -> Result<SandboxOutput, SandboxError> {
        if !Self::binary_exists(&self.config.nsjail_path) {
            return Err(SandboxError::environment_unavailable(
                self.config.nsjail_path.display().to_string(),
                "nsjail binary not found",
            ));
        }
        log::debug!(
            "Launching nsjail for {} with timeout {:?}",
            command.script_path.display(),
            timeout
        );
        run_with_timeout(self.build_command(command), timeout).await
    }

    fn name(&self) -> &'static str {
        "nsjail"
    }

    fn is_available(&self) -> bool {
        Self::binary_exists(&self.config.nsjail_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn command() -> SandboxCommand {
        SandboxCommand {
            interpreter: PathBuf::from("/usr/bin/python3"),
            harness_path: PathBuf::from("/tmp/exec-abc/harness.py"),
            script_path: PathBuf::from("/tmp/exec-abc/user_script.py"),
            working_dir: PathBuf::from("/tmp/exec-abc"),
        }
    }

    #[test]
    fn default_arguments() {
        let sandbox = NsjailSandbox::new(SandboxConfig::default());
        assert_eq!(
            sandbox.build_args(&command()),
            vec![
                "--config",
                "/app/nsjail.cfg",
                "--quiet",
                "--tmpfsmount",
                "/tmp",
                "--cwd",
                "/tmp/exec-abc",
                "--",
                "/usr/bin/python3",
                "/tmp/exec-abc/harness.py",
                "/tmp/exec-abc/user_script.py",
            ]
        );
    }

    #[test]
    fn optional_arguments_follow_config() {
        let config = SandboxConfig {
            nsjail_config: None,
            nsjail_quiet: false,
            tmpfs_mounts: vec![],
            extra_args: vec!["--rlimit_as".to_string(), "512".to_string()],
            ..SandboxConfig::default()
        };
        let args = NsjailSandbox::new(config).build_args(&command());

        assert!(!args.contains(&"--config".to_string()));
        assert!(!args.contains(&"--quiet".to_string()));
        assert!(!args.contains(&"--tmpfsmount".to_string()));
        let separator = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(&args[separator - 2..separator], ["--rlimit_as", "512"]);
    }

    #[tokio::test]
    async fn missing_nsjail_is_environment_unavailable() {
        let config = SandboxConfig {
            nsjail_path: PathBuf::from("/nonexistent/nsjail"),
            ..SandboxConfig::default()
        };
        let sandbox = NsjailSandbox::new(config);
        assert!(!sandbox.is_available());

        let err = sandbox
            .run(&command(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::EnvironmentUnavailable { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn passes_arguments_to_the_binary() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("nsjail");
        std::fs::write(&fake, "#!/bin/sh\nprintf '%s\\n' \"$@\"\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = SandboxConfig {
            nsjail_path: fake,
            nsjail_config: None,
            ..SandboxConfig::default()
        };
        let mut cmd = command();
        cmd.working_dir = dir.path().to_path_buf();

        let output = NsjailSandbox::new(config)
            .run(&cmd, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(output.exit_code, 0);
        let lines: Vec<&str> = output.stdout.lines().collect();
        assert_eq!(lines[0], "--quiet");
        assert_eq!(lines.last(), Some(&"/tmp/exec-abc/user_script.py"));
    }
}
