//! Durable checkpoint store backed by one JSON file per workflow.

use super::{Checkpoint, CheckpointStore};
use crate::context::WorkflowContext;
use crate::errors::{CheckpointIoError, NotFoundError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

const EXTENSION: &str = "json";

/// Stores `<root>/<workflow_id>.json`, replaced atomically on every save.
///
/// Writes go to a temporary sibling that is synced and renamed over the
/// target, so a crash leaves either the old or the new checkpoint.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns a checkpoint error if the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|err| CheckpointIoError::new(Uuid::nil(), "open", format!("{}: {err}", root.display())))?;
        Ok(Self { root })
    }

    /// The store's directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, workflow_id: Uuid) -> PathBuf {
        self.root.join(format!("{workflow_id}.{EXTENSION}"))
    }
}

async fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent"))?;
    let tmp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name().and_then(|v| v.to_str()).unwrap_or("checkpoint"),
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    );
    let tmp_path = parent.join(tmp_name);

    {
        let mut file = tokio::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)
            .await?;
        file.write_all(content).await?;
        file.sync_all().await?;
    }

    if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    sync_parent_dir(parent).await
}

#[cfg(unix)]
async fn sync_parent_dir(parent: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(parent).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_parent_dir(_parent: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, workflow_id: Uuid, context: &WorkflowContext) -> Result<()> {
        let raw = Checkpoint::seal(context)?.to_json()?;
        let path = self.path_for(workflow_id);
        atomic_write(&path, raw.as_bytes())
            .await
            .map_err(|err| CheckpointIoError::new(workflow_id, "save", err.to_string()))?;
        debug!(workflow_id = %workflow_id, path = %path.display(), "Checkpoint written");
        Ok(())
    }

    async fn load(&self, workflow_id: Uuid) -> Result<WorkflowContext> {
        let raw = match tokio::fs::read_to_string(self.path_for(workflow_id)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(NotFoundError::checkpoint(workflow_id).into());
            }
            Err(err) => return Err(CheckpointIoError::new(workflow_id, "load", err.to_string()).into()),
        };
        let checkpoint = Checkpoint::from_json(&raw)
            .map_err(|message| CheckpointIoError::new(workflow_id, "load", message))?;
        Ok(checkpoint.context)
    }

    async fn delete(&self, workflow_id: Uuid) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(workflow_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CheckpointIoError::new(workflow_id, "delete", err.to_string()).into()),
        }
    }

    async fn list(&self) -> Result<Vec<Uuid>> {
        let list_error = |err: std::io::Error| CheckpointIoError::new(Uuid::nil(), "list", err.to_string());

        let mut dir = tokio::fs::read_dir(&self.root).await.map_err(list_error)?;
        let mut ids = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(list_error)? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| Uuid::parse_str(stem).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
