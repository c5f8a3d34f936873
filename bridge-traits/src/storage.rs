//! Storage and File System Abstractions
//!
//! Provides platform-agnostic traits for file I/O, durable record storage,
//! content-addressable payload caching and storage quota estimation.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// Abstracts file I/O operations to support different platforms:
/// - Desktop: Direct filesystem access
/// - iOS/Android: Sandboxed app directories
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn stage(fs: &dyn FileSystemAccess, dir: &Path, data: &[u8]) -> Result<()> {
///     fs.append_file(&dir.join("chunk.part"), Bytes::copy_from_slice(data)).await
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, creating it if it doesn't exist
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Append data to an existing file or create it
    async fn append_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// List all entries in a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Calculate total size of a directory recursively
    async fn directory_size(&self, path: &Path) -> Result<u64> {
        let mut total = 0u64;
        let entries = self.list_directory(path).await?;

        for entry in entries {
            let metadata = self.metadata(&entry).await?;
            if metadata.is_directory {
                total += self.directory_size(&entry).await?;
            } else {
                total += metadata.size;
            }
        }

        Ok(total)
    }
}

/// Logical tables held by a [`RecordStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordTable {
    /// Download items keyed by download id.
    Downloads,
    /// Last-access timestamps keyed by content id.
    MediaAccess,
}

impl RecordTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordTable::Downloads => "downloads",
            RecordTable::MediaAccess => "media-access",
        }
    }
}

impl fmt::Display for RecordTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable key-value record storage.
///
/// Abstracts platform-specific structured storage:
/// - Desktop: SQLite
/// - Web: IndexedDB object stores
///
/// Writes are per-key upserts; implementations must never rewrite a whole
/// table to change a single record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Return every record of a table as `(key, value)` pairs.
    async fn get_all(&self, table: RecordTable) -> Result<Vec<(String, serde_json::Value)>>;

    /// Fetch a single record.
    async fn get(&self, table: RecordTable, key: &str) -> Result<Option<serde_json::Value>>;

    /// Insert or replace a record.
    async fn put(&self, table: RecordTable, key: &str, value: serde_json::Value) -> Result<()>;

    /// Delete a record. Deleting a missing key is not an error.
    async fn delete(&self, table: RecordTable, key: &str) -> Result<()>;

    /// Remove every record of a table.
    async fn clear(&self, table: RecordTable) -> Result<()>;
}

/// Content-addressable payload cache.
///
/// Keys are opaque strings (source URLs for committed payloads). `append`
/// lets a transfer stage partial bodies under a separate key before the
/// final payload is committed.
#[async_trait]
pub trait ByteCache: Send + Sync {
    /// Store a payload, replacing any previous value.
    async fn put(&self, key: &str, payload: Bytes) -> Result<()>;

    /// Fetch a payload.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Check whether a payload exists.
    async fn contains(&self, key: &str) -> Result<bool>;

    /// Append bytes to a payload, creating it if missing.
    async fn append(&self, key: &str, chunk: Bytes) -> Result<()>;

    /// Size of a stored payload in bytes.
    async fn size(&self, key: &str) -> Result<Option<u64>>;

    /// Delete a payload. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every payload whose key starts with `prefix`; returns the count.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize>;

    /// Locally resolvable locator (e.g. `file://` URL) for a stored payload.
    async fn locate(&self, key: &str) -> Result<Option<String>>;
}

/// Platform storage usage report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageEstimate {
    /// Bytes used by this application, if measurable.
    pub usage: Option<u64>,
    /// Bytes available to this application in total, if known.
    pub quota: Option<u64>,
}

/// Coarse device classification used for heuristic quota defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// Phones and narrow touch devices.
    Mobile,
    /// Laptops and desktops.
    Desktop,
}

/// Storage quota estimation trait
///
/// Abstracts platform storage estimates:
/// - Desktop: disk free space plus cache directory size
/// - Web: `navigator.storage.estimate()`
///
/// Returning `Ok(None)` means the platform offers no estimate; callers fall
/// back to device-class defaults.
#[async_trait]
pub trait StorageEstimator: Send + Sync {
    /// Current usage and quota, if the platform can report them.
    async fn estimate(&self) -> Result<Option<StorageEstimate>>;

    /// Device classification for default quota selection.
    fn device_class(&self) -> DeviceClass {
        DeviceClass::Desktop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_metadata() {
        let metadata = FileMetadata {
            size: 1024,
            created_at: Some(1234567890),
            modified_at: Some(1234567900),
            is_directory: false,
        };

        assert_eq!(metadata.size, 1024);
        assert!(!metadata.is_directory);
    }

    #[test]
    fn test_record_table_names() {
        assert_eq!(RecordTable::Downloads.as_str(), "downloads");
        assert_eq!(RecordTable::MediaAccess.to_string(), "media-access");
    }

    #[test]
    fn test_device_class_serde() {
        let json = serde_json::to_string(&DeviceClass::Mobile).unwrap();
        assert_eq!(json, "\"mobile\"");
    }
}
