use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::storage::{PersistedState, SnapshotError, SnapshotStore};

/// Persists the snapshot as a JSON document. Writes go to a sibling temp
/// file first and are renamed over the target, so a crash mid-write leaves
/// the previous snapshot intact.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone();
        tmp.set_extension("tmp");
        tmp
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> Result<Option<PersistedState>, SnapshotError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(SnapshotError::Backend(err.to_string())),
        };

        let state = serde_json::from_slice(&bytes)
            .map_err(|err| SnapshotError::Serialization(err.to_string()))?;
        Ok(Some(state))
    }

    async fn save(&self, state: &PersistedState) -> Result<(), SnapshotError> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|err| SnapshotError::Serialization(err.to_string()))?;

        if let Some(parent) = self.path.parent() {
            ensure_dir(parent).await?;
        }

        let tmp = self.tmp_path();
        fs::write(&tmp, &bytes)
            .await
            .map_err(|err| SnapshotError::Backend(err.to_string()))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| SnapshotError::Backend(err.to_string()))?;
        Ok(())
    }
}

async fn ensure_dir(parent: &Path) -> Result<(), SnapshotError> {
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(parent)
        .await
        .map_err(|err| SnapshotError::Backend(err.to_string()))
}
