//! Workspace Manager
//!
//! Creates and destroys the scratch directory a deployment clones the QA
//! repository into. Each deployment owns exactly one workspace; paths are
//! never shared across deployments.

use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::fs;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Guard against removing the filesystem root or an empty path
    #[error("refusing to remove workspace path {0:?}")]
    InvalidPath(PathBuf),

    #[error("workspace I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Owns the workspace root directory and the lifecycle of per-deployment
/// scratch directories beneath it.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a fresh workspace for one deployment. Any stale entry at
    /// the same path is removed first; parents are created as needed.
    pub async fn acquire(&self, repo_name: &str) -> Result<PathBuf, WorkspaceError> {
        fs::create_dir_all(&self.root).await?;

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let path = self.root.join(format!("sentry-{repo_name}-{stamp}"));

        if fs::metadata(&path).await.is_ok() {
            fs::remove_dir_all(&path).await?;
        }
        fs::create_dir_all(&path).await?;
        fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;

        debug!(path = %path.display(), "workspace acquired");
        Ok(path)
    }

    /// Remove a workspace recursively. A missing path is not an error;
    /// `""` and `/` are rejected.
    pub async fn release(&self, path: &Path) -> Result<(), WorkspaceError> {
        if path.as_os_str().is_empty() || path == Path::new("/") {
            return Err(WorkspaceError::InvalidPath(path.to_path_buf()));
        }

        match fs::remove_dir_all(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "workspace released");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
