//! Directory-backed key/value store (one file per key)

use super::{KeyValueBackend, StorageFault};
use async_trait::async_trait;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

/// Local device storage: each key is a file under `dir`.
///
/// Writes go to a uniquely named temporary sibling, are synced, and are then
/// renamed into place, so a reader never observes a half-written value.
/// Writes through one backend (and its clones) are applied one at a time,
/// in the order they were issued.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageFault> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StorageFault::unavailable(format!("invalid storage key: {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl KeyValueBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageFault> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageFault> {
        let path = self.path_for(key)?;
        let dir = self.dir.clone();
        let contents = value.to_owned();

        let _guard = self.write_lock.lock().await;
        tokio::task::spawn_blocking(move || atomic_write(&dir, &path, contents.as_bytes()))
            .await
            .map_err(|e| StorageFault::unavailable(format!("write task failed: {e}")))??;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageFault> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn contains(&self, key: &str) -> Result<bool, StorageFault> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

/// Temp file in `dir`, fsync, rename over `path`. The temp file is removed
/// if anything fails before the rename.
fn atomic_write(dir: &Path, path: &Path, contents: &[u8]) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
