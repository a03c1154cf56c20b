use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, trace};
use veloce_types::FileOptions;

use crate::error::{StoreError, StoreResult};
use crate::traits::StoreBackend;

/// Filesystem-backed store.
///
/// Writes run on tokio's blocking pool. With [`FileOptions::atomic`] set,
/// content is written to a temporary file in the same directory and renamed
/// over the target, so readers never observe a half-written document.
#[derive(Clone, Debug, Default)]
pub struct FileStore {
    options: FileOptions,
}

impl FileStore {
    pub fn new(options: FileOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl StoreBackend for FileStore {
    async fn read(&self, path: &Path) -> StoreResult<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                trace!(path = %path.display(), len = bytes.len(), "file read");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> StoreResult<()> {
        let path = path.to_path_buf();
        let bytes = bytes.to_vec();
        let options = self.options.clone();
        let len = bytes.len();

        let written = tokio::task::spawn_blocking(move || write_blocking(&path, &bytes, &options))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?;
        let path = written?;

        debug!(path = %path.display(), len, "file written");
        Ok(())
    }

    async fn remove(&self, path: &Path) -> StoreResult<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "file removed");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &Path) -> StoreResult<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }
}

fn write_blocking(path: &Path, bytes: &[u8], options: &FileOptions) -> StoreResult<PathBuf> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if options.create_dirs {
        fs::create_dir_all(&parent)?;
    }

    if options.atomic {
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(bytes)?;
        if options.sync {
            tmp.as_file().sync_all()?;
        }
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    } else {
        let mut file = File::create(path)?;
        file.write_all(bytes)?;
        if options.sync {
            file.sync_all()?;
        }
    }
    Ok(path.to_path_buf())
}
