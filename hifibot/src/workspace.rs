use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Owns the scratch directory that fetches write into.
///
/// All requests share one directory, so ownership is handed out one
/// [`Workspace`] at a time; a second `acquire` waits until the first
/// workspace has been released or dropped.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Wait for exclusive use of the workspace, then wipe and recreate it.
    pub async fn acquire(&self) -> Result<Workspace> {
        let guard = Arc::clone(&self.lock).lock_owned().await;

        remove_dir_if_present(&self.root)
            .await
            .map_err(|source| Error::WorkspaceIo {
                path: self.root.clone(),
                source,
            })?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| Error::WorkspaceIo {
                path: self.root.clone(),
                source,
            })?;

        debug!(path = %self.root.display(), "workspace acquired");
        Ok(Workspace {
            path: self.root.clone(),
            released: false,
            _guard: guard,
        })
    }
}

/// Exclusive handle on the workspace directory.
///
/// Dropping the handle without calling [`Workspace::release`] still removes
/// the directory before the lock is given up.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    released: bool,
    _guard: OwnedMutexGuard<()>,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recursively delete the workspace. Succeeds if it is already gone.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let result = remove_dir_if_present(&self.path).await;
        match result {
            Ok(()) => {
                debug!(path = %self.path.display(), "workspace released");
                Ok(())
            }
            Err(source) => Err(Error::WorkspaceIo {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released || !self.path.exists() {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to clean up workspace");
        }
    }
}

async fn remove_dir_if_present(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
