//! File-based state persistence for actors.

use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Stores small pieces of actor state as JSON files in one directory.
///
/// The scheduler keeps its last-fired watermarks here so a restart does not
/// fire an occurrence twice.
#[derive(Debug, Clone)]
pub struct StatePersistence {
    base_dir: PathBuf,
}

impl StatePersistence {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Ensure the base directory exists.
    pub async fn init(&self) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }

    /// Save state under `name`, replacing any previous value atomically.
    pub async fn save<T: Serialize>(&self, name: &str, state: &T) -> Result<(), PersistenceError> {
        let path = self.path(name);
        let json = serde_json::to_vec_pretty(state)?;

        let temp_path = self.base_dir.join(format!("{}.json.tmp", name));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &path).await?;

        tracing::debug!(path = %path.display(), "saved state");
        Ok(())
    }

    /// Load state saved under `name`, if any.
    pub async fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, PersistenceError> {
        let path = self.path(name);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state = serde_json::from_slice(&bytes)?;
        tracing::debug!(path = %path.display(), "loaded state");
        Ok(Some(state))
    }

    /// Delete the state saved under `name`.
    pub async fn delete(&self, name: &str) -> Result<(), PersistenceError> {
        match fs::remove_file(self.path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", name))
    }
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
