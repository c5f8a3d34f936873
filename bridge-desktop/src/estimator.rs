//! Storage Estimation using the host filesystem

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{DeviceClass, FileSystemAccess, StorageEstimate, StorageEstimator},
};
use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tracing::{debug, warn};

use crate::filesystem::TokioFileSystem;

/// Desktop storage estimator
///
/// Usage is the recursive size of the cache root. Quota is that usage plus
/// the free space of the disk holding the cache root, so the figure shrinks
/// as other applications fill the disk.
pub struct DesktopStorageEstimator {
    root: PathBuf,
    fs: TokioFileSystem,
    device_class: DeviceClass,
}

impl DesktopStorageEstimator {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            fs: TokioFileSystem::new(),
            device_class: DeviceClass::Desktop,
        }
    }

    /// Override the reported device class.
    pub fn with_device_class(mut self, device_class: DeviceClass) -> Self {
        self.device_class = device_class;
        self
    }

    async fn usage(&self) -> Result<u64> {
        match self.fs.directory_size(&self.root).await {
            Ok(size) => Ok(size),
            Err(e) if e.is_not_found() => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn nearest_existing(path: &Path) -> PathBuf {
        let mut candidate = path.to_path_buf();
        while !candidate.exists() {
            if !candidate.pop() {
                return PathBuf::from(".");
            }
        }
        std::fs::canonicalize(&candidate).unwrap_or(candidate)
    }

    /// Free space on the disk with the longest mount point prefixing `path`.
    fn available_space(path: &Path) -> Option<u64> {
        let target = Self::nearest_existing(path);
        let disks = Disks::new_with_refreshed_list();

        disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }
}

#[async_trait]
impl StorageEstimator for DesktopStorageEstimator {
    async fn estimate(&self) -> Result<Option<StorageEstimate>> {
        let usage = self.usage().await?;

        let root = self.root.clone();
        let available = tokio::task::spawn_blocking(move || Self::available_space(&root))
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Disk scan failed: {}", e)))?;

        if available.is_none() {
            warn!(root = ?self.root, "No disk found for cache root");
        }

        let estimate = StorageEstimate {
            usage: Some(usage),
            quota: available.map(|free| usage.saturating_add(free)),
        };
        debug!(usage, quota = ?estimate.quota, "Estimated storage");
        Ok(Some(estimate))
    }

    fn device_class(&self) -> DeviceClass {
        self.device_class
    }
}
