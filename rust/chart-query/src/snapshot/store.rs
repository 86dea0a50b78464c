use super::model::{QuerySnapshot, SCHEMA_VERSION};
use crate::error::{Result, ServiceError};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use uuid::Uuid;

/// Keyed durable storage for snapshot records.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn put(&self, snapshot: &QuerySnapshot) -> Result<()>;

    /// `Ok(None)` when no record exists under `id`.
    async fn get(&self, id: &str) -> Result<Option<QuerySnapshot>>;
}

/// Snapshot ids are file names; anything outside `[A-Za-z0-9_-]` is refused.
pub fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if valid {
        Ok(())
    } else {
        Err(ServiceError::InvalidRequest(format!("invalid snapshot id '{id}'")))
    }
}

fn check_version(snapshot: QuerySnapshot) -> Result<QuerySnapshot> {
    if snapshot.schema_version > SCHEMA_VERSION {
        return Err(ServiceError::Internal(anyhow!(
            "snapshot {} has unsupported schema version {}",
            snapshot.id,
            snapshot.schema_version
        )));
    }
    Ok(snapshot)
}

/// One pretty-printed JSON file per snapshot, `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub async fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create snapshot directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{id}.json")))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn put(&self, snapshot: &QuerySnapshot) -> Result<()> {
        let path = self.path_for(&snapshot.id)?;
        let body = serde_json::to_vec_pretty(snapshot).context("failed to encode snapshot")?;

        // Stage then rename: concurrent readers see the old or new record, never a partial one.
        let staging = self
            .dir
            .join(format!("{}.json.{}.tmp", snapshot.id, Uuid::new_v4().simple()));
        if let Err(err) = tokio::fs::write(&staging, body).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(anyhow::Error::new(err)
                .context(format!("failed to write {}", staging.display()))
                .into());
        }
        if let Err(err) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(anyhow::Error::new(err)
                .context(format!("failed to replace {}", path.display()))
                .into());
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<QuerySnapshot>> {
        let path = self.path_for(id)?;
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("failed to read {}", path.display()))
                    .into())
            }
        };

        let snapshot: QuerySnapshot = serde_json::from_slice(&body)
            .with_context(|| format!("failed to decode {}", path.display()))?;
        check_version(snapshot).map(Some)
    }
}

#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    records: RwLock<HashMap<String, QuerySnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn put(&self, snapshot: &QuerySnapshot) -> Result<()> {
        validate_id(&snapshot.id)?;
        self.records
            .write()
            .insert(snapshot.id.clone(), snapshot.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<QuerySnapshot>> {
        validate_id(id)?;
        let record = self.records.read().get(id).cloned();
        record.map(check_version).transpose()
    }
}
