//! JSON file store: one file per location in a data directory.
//!
//! Files are named `sol_azimuth_checkpoints_{location_id}.json`. Writes go
//! to a temporary sibling first and are renamed into place, so a crash
//! mid-write never leaves a truncated blob behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use sol_types::LocationId;

use crate::{CacheStore, StoreError};

/// File name prefix shared by every cache blob.
const FILE_PREFIX: &str = "sol_azimuth_checkpoints_";

/// Stores blobs as pretty-printed JSON files under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The data directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the blob for `id`.
    pub fn path_for(&self, id: LocationId) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{id}.json"))
    }
}

impl CacheStore for FileStore {
    async fn load(&self, id: LocationId) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(id);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, id: LocationId, blob: &Value) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(id);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_vec_pretty(blob)?;
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(location = %id, path = %path.display(), "Checkpoint blob written");
        Ok(())
    }

    async fn remove(&self, id: LocationId) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
