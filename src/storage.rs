use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};
use crate::error::StorageError;

/// Flat namespace of named byte blobs, shared by all sessions of a server.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// names of all stored resources, sorted
    async fn list(&self) -> Result<Vec<String>, StorageError>;

    async fn read(&self, name: &str) -> Result<Bytes, StorageError>;

    /// creates or replaces a resource
    async fn write(&self, name: &str, content: Bytes) -> Result<(), StorageError>;
}

/// Rejects names that do not denote a file directly inside the storage root.
pub fn validate_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Stores every resource as a regular file in a root directory.
///
/// Writes to the same name are serialized, so a reader never sees a file that is written by two
///  sessions at the same time. Sequential writes follow last-writer-wins.
pub struct FsStorage {
    root: PathBuf,
    write_locks: Mutex<FxHashMap<String, Arc<Mutex<()>>>>,
}

impl FsStorage {
    pub async fn open(root: impl AsRef<Path>) -> anyhow::Result<FsStorage> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        info!("serving files from {:?}", root);

        Ok(FsStorage {
            root,
            write_locks: Default::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    async fn write_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.write_locks.lock().await
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Drops the table entry unless another writer holds or awaits the lock. Checking under the
    ///  table lock means nobody can pick up the entry concurrently.
    async fn release_write_lock(&self, name: &str, lock: Arc<Mutex<()>>) {
        let mut write_locks = self.write_locks.lock().await;
        // one reference in the table, one here
        if Arc::strong_count(&lock) == 2 {
            write_locks.remove(name);
        }
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut result = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => result.push(name),
                Err(name) => debug!("skipping file with non-UTF-8 name {:?}", name),
            }
        }

        result.sort();
        Ok(result)
    }

    async fn read(&self, name: &str) -> Result<Bytes, StorageError> {
        let path = self.path_of(name)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content.into()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, name: &str, content: Bytes) -> Result<(), StorageError> {
        let path = self.path_of(name)?;

        let lock = self.write_lock(name).await;
        let result = {
            let _guard = lock.lock().await;
            debug!("writing {} bytes to {:?}", content.len(), path);
            tokio::fs::write(&path, &content).await
        };
        self.release_write_lock(name, lock).await;

        Ok(result?)
    }
}
