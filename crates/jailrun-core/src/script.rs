//! Request-scoped scratch storage for the user script and the harness.
//!
//! Each request gets a freshly created private directory. The directory is
//! owned by [`ScriptWorkspace`] and removed when the workspace is dropped, so
//! cleanup happens on every exit path including timeouts and panics.

use crate::errors::JailError;
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempDir};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const SCRIPT_FILE_NAME: &str = "user_script.py";
pub const HARNESS_FILE_NAME: &str = "harness.py";
const WORKSPACE_PREFIX: &str = "exec-";

#[derive(Debug)]
pub struct ScriptWorkspace {
    dir: TempDir,
    script_path: PathBuf,
    harness_path: PathBuf,
}

impl ScriptWorkspace {
    /// Creates the scratch directory under the system temp dir and writes
    /// both files into it.
    pub async fn materialize(script: &str, harness_source: &str) -> Result<Self, JailError> {
        Self::materialize_in(&std::env::temp_dir(), script, harness_source).await
    }

    /// Same as [`ScriptWorkspace::materialize`] with an explicit parent directory.
    pub async fn materialize_in(
        parent: &Path,
        script: &str,
        harness_source: &str,
    ) -> Result<Self, JailError> {
        let dir = Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(parent)
            .map_err(|e| {
                JailError::WorkspaceError(format!(
                    "Could not create scratch directory in {}: {}",
                    parent.display(),
                    e
                ))
            })?;

        let script_path = dir.path().join(SCRIPT_FILE_NAME);
        let harness_path = dir.path().join(HARNESS_FILE_NAME);
        write_file(&script_path, script).await?;
        write_file(&harness_path, harness_source).await?;

        log::debug!("Materialized script workspace at {}", dir.path().display());
        Ok(Self {
            dir,
            script_path,
            harness_path,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    pub fn harness_path(&self) -> &Path {
        &self.harness_path
    }

    /// Removes the directory now and reports failures, instead of the silent
    /// removal done on drop.
    pub fn close(self) -> Result<(), JailError> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|e| {
            JailError::WorkspaceError(format!(
                "Failed to remove scratch directory {}: {}",
                path.display(),
                e
            ))
        })
    }
}

async fn write_file(path: &Path, content: &str) -> Result<(), JailError> {
    let mut file = fs::File::create(path).await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
