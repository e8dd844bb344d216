//! Downloaded payloads awaiting relocation to their final name.
//!
//! An [`Artifact`] owns a temporary file created next to its destination so
//! that [`Artifact::persist`] is a same-filesystem rename. If the rename
//! fails, or the artifact is dropped before being persisted, the temporary
//! file is deleted.
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The temporary file has already been removed when this is returned.
    #[error("failed to move artifact to {}: {source}", dest.display())]
    Rename {
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct Artifact {
    path: TempPath,
}

impl Artifact {
    /// Create an empty artifact inside `dir` and return it with a writable handle.
    pub async fn create_in(dir: &Path) -> Result<(Self, tokio::fs::File)> {
        let named = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".part")
            .tempfile_in(dir)
            .with_context(|| format!("failed to create temporary file in {}", dir.display()))?;
        let (file, path) = named.into_parts();
        Ok((Self { path }, tokio::fs::File::from_std(file)))
    }

    /// Create an artifact in `dir` holding `bytes`.
    pub async fn from_bytes(dir: &Path, bytes: &[u8]) -> Result<Self> {
        let (artifact, mut file) = Self::create_in(dir).await?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("failed to write {}", artifact.path().display()))?;
        file.flush().await?;
        Ok(artifact)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the artifact to `dest`, replacing any existing file there.
    pub fn persist(self, dest: &Path) -> Result<PathBuf, StoreError> {
        match self.path.persist(dest) {
            Ok(()) => Ok(dest.to_path_buf()),
            Err(err) => {
                // Dropping the returned TempPath deletes the temporary file.
                let tempfile::PathPersistError { error, path } = err;
                drop(path);
                Err(StoreError::Rename {
                    dest: dest.to_path_buf(),
                    source: error,
                })
            }
        }
    }
}
