//! File-backed payload cache
//!
//! Stores each payload as `<sha256(key)>.bin` under a root directory with a
//! `<sha256(key)>.key` sidecar holding the original key, so prefix deletes can
//! run without an index.

use async_trait::async_trait;
use bridge_traits::{error::Result, ByteCache, FileSystemAccess};
use bytes::Bytes;
use core_runtime::logging::{redact_url, strip_path};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

const PAYLOAD_EXT: &str = "bin";
const KEY_EXT: &str = "key";

/// [`ByteCache`] implementation over a [`FileSystemAccess`] bridge
pub struct FileByteCache {
    fs: Arc<dyn FileSystemAccess>,
    root: PathBuf,
}

impl FileByteCache {
    pub fn new(fs: Arc<dyn FileSystemAccess>, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
        }
    }

    /// Root directory holding payload files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory.
    pub async fn initialize(&self) -> Result<()> {
        self.fs.create_dir_all(&self.root).await
    }

    fn digest(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", Self::digest(key), PAYLOAD_EXT))
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", Self::digest(key), KEY_EXT))
    }

    async fn write_sidecar(&self, key: &str) -> Result<()> {
        self.fs
            .write_file(&self.key_path(key), Bytes::copy_from_slice(key.as_bytes()))
            .await
    }

    async fn remove_quietly(&self, path: &Path) -> Result<bool> {
        match self.fs.delete_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ByteCache for FileByteCache {
    #[instrument(skip(self, key, payload), fields(key = %redact_url(key), size = payload.len()))]
    async fn put(&self, key: &str, payload: Bytes) -> Result<()> {
        let path = self.payload_path(key);
        self.write_sidecar(key).await?;
        self.fs.write_file(&path, payload).await?;
        debug!(file = %strip_path(&path.to_string_lossy()), "Stored payload");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match self.fs.read_file(&self.payload_path(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        self.fs.exists(&self.payload_path(key)).await
    }

    async fn append(&self, key: &str, chunk: Bytes) -> Result<()> {
        let path = self.payload_path(key);
        if !self.fs.exists(&path).await? {
            self.write_sidecar(key).await?;
        }
        self.fs.append_file(&path, chunk).await
    }

    async fn size(&self, key: &str) -> Result<Option<u64>> {
        match self.fs.metadata(&self.payload_path(key)).await {
            Ok(metadata) => Ok(Some(metadata.size)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.remove_quietly(&self.payload_path(key)).await?;
        self.remove_quietly(&self.key_path(key)).await?;
        Ok(())
    }

    #[instrument(skip(self, prefix), fields(prefix = %redact_url(prefix)))]
    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize> {
        let entries = match self.fs.list_directory(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        for sidecar in entries
            .iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == KEY_EXT))
        {
            let key = match self.fs.read_file(sidecar).await {
                Ok(data) => String::from_utf8_lossy(&data).into_owned(),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };

            if key.starts_with(prefix) {
                if self
                    .remove_quietly(&sidecar.with_extension(PAYLOAD_EXT))
                    .await?
                {
                    removed += 1;
                }
                self.remove_quietly(sidecar).await?;
            }
        }

        debug!(removed, "Deleted payloads by prefix");
        Ok(removed)
    }

    async fn locate(&self, key: &str) -> Result<Option<String>> {
        let path = self.payload_path(key);
        if self.fs.exists(&path).await? {
            Ok(Some(format!("file://{}", path.display())))
        } else {
            Ok(None)
        }
    }
}
