//! Locating the Python interpreter on the host.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::errors::SandboxError;

/// Absolute locations probed, in order, before falling back to `PATH`.
pub const DEFAULT_INTERPRETER_CANDIDATES: &[&str] = &[
    "/usr/local/bin/python3",
    "/usr/bin/python3",
    "/bin/python3",
    "/opt/homebrew/bin/python3",
];

const PATH_FALLBACK: &str = "python3";

/// Finds an interpreter.
///
/// An explicit override wins and must point at an executable file (a bare
/// name is looked up on `PATH`). Without one, the first executable
/// candidate is used, then `python3` from `PATH`.
pub fn resolve_interpreter(
    override_path: Option<&Path>,
    candidates: &[PathBuf],
) -> Result<PathBuf, SandboxError> {
    if let Some(path) = override_path {
        return resolve_override(path);
    }

    if let Some(found) = candidates.iter().find(|c| is_executable(c)) {
        return Ok(found.clone());
    }

    which::which(PATH_FALLBACK).map_err(|_| {
        let probed: Vec<String> = candidates.iter().map(|c| c.display().to_string()).collect();
        SandboxError::environment_unavailable(
            PATH_FALLBACK,
            format!(
                "no Python interpreter found (probed {} and PATH)",
                probed.join(", ")
            ),
        )
    })
}

fn resolve_override(path: &Path) -> Result<PathBuf, SandboxError> {
    if path.components().count() == 1 && !path.is_absolute() {
        return which::which(path).map_err(|e| {
            SandboxError::environment_unavailable(path.display().to_string(), e.to_string())
        });
    }
    if is_executable(path) {
        Ok(path.to_path_buf())
    } else {
        Err(SandboxError::environment_unavailable(
            path.display().to_string(),
            "configured interpreter is not an executable file",
        ))
    }
}

pub fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Resolves the interpreter once and remembers it.
///
/// Failures are not cached, so installing Python fixes a running service
/// without a restart.
#[derive(Debug)]
pub struct InterpreterResolver {
    override_path: Option<PathBuf>,
    candidates: Vec<PathBuf>,
    resolved: OnceLock<PathBuf>,
}

impl InterpreterResolver {
    pub fn new(override_path: Option<PathBuf>) -> Self {
        Self::with_candidates(
            override_path,
            DEFAULT_INTERPRETER_CANDIDATES.iter().map(PathBuf::from).collect(),
        )
    }

    pub fn with_candidates(override_path: Option<PathBuf>, candidates: Vec<PathBuf>) -> Self {
        Self {
            override_path,
            candidates,
            resolved: OnceLock::new(),
        }
    }

    pub fn resolve(&self) -> Result<PathBuf, SandboxError> {
        if let Some(path) = self.resolved.get() {
            return Ok(path.clone());
        }
        let path = resolve_interpreter(self.override_path.as_deref(), &self.candidates)?;
        log::info!("Using Python interpreter {}", path.display());
        Ok(self.resolved.get_or_init(|| path).clone())
    }
}
