//! Bounded child-process runner shared by the sandbox backends.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::{AbortHandle, JoinError, JoinHandle};

use super::SandboxOutput;
use crate::errors::SandboxError;

/// How long to wait for the output pipes to close after the child exits.
/// Descendants that still hold them open after this are killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

type Captured = Arc<Mutex<Vec<u8>>>;
type ReaderResult = Result<io::Result<()>, JoinError>;

/// Kills the process group and stops the readers when a run is abandoned.
struct RunGuard {
    pid: Option<u32>,
    readers: [AbortHandle; 2],
    armed: bool,
}

impl RunGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        log::debug!("Sandbox run abandoned, killing process group {:?}", self.pid);
        kill_process_group(self.pid);
        for reader in &self.readers {
            reader.abort();
        }
    }
}

/// Spawns `command`, captures both streams and waits at most `timeout`.
///
/// The child is placed in its own process group. On timeout the whole group
/// is killed and [`SandboxError::TimedOut`] is returned; partial output is
/// discarded. Dropping the returned future kills the group as well.
pub async fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
) -> Result<SandboxOutput, SandboxError> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let started = Instant::now();
    let mut child = command.spawn().map_err(|e| spawn_error(&program, e))?;
    let pid = child.id();

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SandboxError::CaptureFailed("stdout pipe was not created".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| SandboxError::CaptureFailed("stderr pipe was not created".to_string()))?;
    let stdout_buf = Captured::default();
    let stderr_buf = Captured::default();
    let mut stdout_reader = tokio::spawn(read_into(stdout, stdout_buf.clone()));
    let mut stderr_reader = tokio::spawn(read_into(stderr, stderr_buf.clone()));
    let guard = RunGuard {
        pid,
        readers: [stdout_reader.abort_handle(), stderr_reader.abort_handle()],
        armed: true,
    };

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            log::warn!(
                "Sandbox process '{}' (pid {:?}) exceeded {:?}, killing its process group",
                program,
                pid,
                timeout
            );
            kill_process_group(pid);
            if let Err(e) = child.kill().await {
                log::debug!("Killing timed out child failed: {}", e);
            }
            stdout_reader.abort();
            stderr_reader.abort();
            guard.disarm();
            return Err(SandboxError::TimedOut { timeout });
        }
    };

    let mut out_done = None;
    let mut err_done = None;
    let drained = tokio::time::timeout(DRAIN_GRACE, async {
        finish(&mut stdout_reader, &mut out_done).await;
        finish(&mut stderr_reader, &mut err_done).await;
    })
    .await;
    if drained.is_err() {
        log::warn!(
            "Sandbox process '{}' left descendants holding its output open, killing its process group",
            program
        );
        kill_process_group(pid);
        let reaped = tokio::time::timeout(DRAIN_GRACE, async {
            finish(&mut stdout_reader, &mut out_done).await;
            finish(&mut stderr_reader, &mut err_done).await;
        })
        .await;
        if reaped.is_err() {
            // Something outside the group still holds the pipes.
            log::warn!(
                "Sandbox process '{}' has descendants outside its process group, keeping the output captured so far",
                program
            );
            stdout_reader.abort();
            stderr_reader.abort();
        }
    }
    guard.disarm();

    let output = SandboxOutput {
        exit_code: exit_code(status),
        stdout: collect(out_done, &stdout_buf)?,
        stderr: collect(err_done, &stderr_buf)?,
        elapsed: started.elapsed(),
    };
    log::debug!(
        "Sandbox process '{}' exited with {} after {:?}",
        program,
        output.exit_code,
        output.elapsed
    );
    Ok(output)
}

async fn read_into<R: AsyncRead + Unpin>(mut reader: R, sink: Captured) -> io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        sink.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(&chunk[..n]);
    }
}

/// Awaits `reader` unless it already finished; a completed JoinHandle must not be polled again.
async fn finish(reader: &mut JoinHandle<io::Result<()>>, slot: &mut Option<ReaderResult>) {
    if slot.is_none() {
        *slot = Some(reader.await);
    }
}

/// Output of one stream. An unfinished reader keeps what it read before it was stopped.
fn collect(done: Option<ReaderResult>, captured: &Captured) -> Result<String, SandboxError> {
    match done {
        Some(Ok(Err(e))) => return Err(SandboxError::CaptureFailed(e.to_string())),
        Some(Err(e)) => {
            return Err(SandboxError::CaptureFailed(format!("reader task failed: {}", e)))
        }
        Some(Ok(Ok(()))) | None => {}
    }
    let bytes = captured.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn spawn_error(program: &str, err: io::Error) -> SandboxError {
    // ENOEXEC: the file exists but is not something the kernel can run.
    const ENOEXEC: i32 = 8;
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
            SandboxError::environment_unavailable(program, err.to_string())
        }
        _ if err.raw_os_error() == Some(ENOEXEC) => {
            SandboxError::environment_unavailable(program, err.to_string())
        }
        _ => SandboxError::IoError(err),
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    #[allow(clippy::cast_possible_wrap)]
    let group = Pid::from_raw(pid as i32);
    match killpg(group, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => log::warn!("Failed to kill process group {}: {}", pid, e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn captures_exit_code_and_streams() {
        let output = run_with_timeout(
            sh("echo out; echo err >&2; printf 'tail'; exit 3"),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, "out\ntail");
        assert_eq!(output.stderr, "err\n");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn signal_exit_is_reported_as_128_plus_signal() {
        let output = run_with_timeout(sh("kill -9 $$"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(output.exit_code, 128 + 9);
    }

    #[tokio::test]
    async fn timeout_returns_timed_out() {
        let started = Instant::now();
        let result = run_with_timeout(sh("echo partial; sleep 30"), Duration::from_millis(300)).await;

        match result {
            Err(SandboxError::TimedOut { timeout }) => {
                assert_eq!(timeout, Duration::from_millis(300))
            }
            other => panic!("expected TimedOut, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    /// Polls /proc until `pid` is gone or a zombie.
    #[cfg(target_os = "linux")]
    async fn exits_soon(pid: &str) -> bool {
        let stat_path = format!("/proc/{}/stat", pid);
        for _ in 0..40 {
            match std::fs::read_to_string(&stat_path) {
                Ok(stat) if !stat.contains(") Z ") => {}
                _ => return true,
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_the_whole_process_tree() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("grandchild.pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());

        let result = run_with_timeout(sh(&script), Duration::from_millis(500)).await;
        assert!(matches!(result, Err(SandboxError::TimedOut { .. })));

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        assert!(exits_soon(&pid).await, "grandchild {} survived the timeout", pid);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dropping_the_run_kills_the_whole_process_tree() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("grandchild.pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());

        let abandoned = tokio::time::timeout(
            Duration::from_millis(500),
            run_with_timeout(sh(&script), Duration::from_secs(20)),
        )
        .await;
        assert!(abandoned.is_err());

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        assert!(exits_soon(&pid).await, "grandchild {} survived the dropped run", pid);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn descendants_outside_the_group_do_not_hang_the_run() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("escaped.pid");
        let script = format!(
            "setsid sleep 30 & echo $! > {}; echo done",
            pid_file.display()
        );

        let started = Instant::now();
        let output = run_with_timeout(sh(&script), Duration::from_secs(20))
            .await
            .unwrap();
        let elapsed = started.elapsed();

        let pid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid),
            nix::sys::signal::Signal::SIGKILL,
        );

        assert!(elapsed < Duration::from_secs(5), "run took {:?}", elapsed);
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, "done\n");
    }

    #[tokio::test]
    async fn background_descendants_do_not_hang_the_run() {
        let started = Instant::now();
        let output = run_with_timeout(sh("sleep 30 & echo done"), Duration::from_secs(20))
            .await
            .unwrap();

        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, "done\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_binary_is_environment_unavailable() {
        let result = run_with_timeout(
            Command::new("/nonexistent/jailrun/binary"),
            Duration::from_secs(1),
        )
        .await;
        match result {
            Err(SandboxError::EnvironmentUnavailable { program, .. }) => {
                assert_eq!(program, "/nonexistent/jailrun/binary")
            }
            other => panic!("expected EnvironmentUnavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_executable_file_is_environment_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("not-executable");
        std::fs::write(&path, "#!/bin/sh\necho hi\n").unwrap();

        let result = run_with_timeout(Command::new(&path), Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(SandboxError::EnvironmentUnavailable { .. })
        ));
    }
}
