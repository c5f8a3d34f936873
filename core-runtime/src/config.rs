//! # Core Configuration Module
//!
//! Provides configuration management for the offline media core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds every bridge and path the core needs. It enforces
//! fail-fast validation so that missing capabilities are reported before any
//! download is queued.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - Streams media bodies (desktop default: reqwest)
//! - `FileSystemAccess` - Backs the payload cache (desktop default: tokio fs)
//! - `RecordStore` - Durable download and access records (desktop default: SQLite)
//!
//! ## Optional Dependencies
//!
//! - `ByteCache` - Payload cache; when absent the core builds a file-backed
//!   cache under `cache_dir`
//! - `StorageEstimator` - Platform usage/quota (desktop default: disk free
//!   space); when absent, device-class defaults apply
//! - `Clock` - Time source (default: system clock)
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults for
//! missing bridges and paths are injected automatically.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/offline.db")
//!     .cache_dir("/path/to/cache")
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! Without `desktop-shims`, the builder reports each missing bridge as an
//! [`Error::CapabilityMissing`] with guidance on what to inject.

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{
    ByteCache, Clock, FileSystemAccess, HttpClient, RecordStore, StorageEstimator, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Core configuration for the offline media core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// Directory holding cached payloads and staged partial transfers
    pub cache_dir: PathBuf,

    /// HTTP client used for media transfers
    pub http_client: Arc<dyn HttpClient>,

    /// File system access abstraction
    pub file_system: Arc<dyn FileSystemAccess>,

    /// Durable record storage
    pub record_store: Arc<dyn RecordStore>,

    /// Payload cache override
    pub byte_cache: Option<Arc<dyn ByteCache>>,

    /// Platform storage estimator
    pub storage_estimator: Option<Arc<dyn StorageEstimator>>,

    /// Time source
    pub clock: Arc<dyn Clock>,

    /// Features flags
    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("cache_dir", &self.cache_dir)
            .field("http_client", &"HttpClient { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field("record_store", &"RecordStore { ... }")
            .field(
                "byte_cache",
                &self.byte_cache.as_ref().map(|_| "ByteCache { ... }"),
            )
            .field(
                "storage_estimator",
                &self
                    .storage_estimator
                    .as_ref()
                    .map(|_| "StorageEstimator { ... }"),
            )
            .field("features", &self.features)
            .finish()
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Publish download and cache events on an `EventBus`
    pub enable_event_bus: bool,

    /// Per-subscriber buffer of the event bus
    pub event_buffer_size: usize,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_event_bus: true,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path is not empty
    /// - Cache directory is not empty
    /// - The event buffer can hold at least one event when the bus is enabled
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        if self.features.enable_event_bus && self.features.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event bus enabled with a zero-sized buffer. \
                 Set event_buffer_size to at least 1 or disable the event bus."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Platform defaults
// ============================================================================

#[cfg(not(feature = "desktop-shims"))]
fn capability_missing(capability: &str, message: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: message.to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_database_path() -> Result<PathBuf> {
    Ok(bridge_desktop::default_database_path())
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_database_path() -> Result<PathBuf> {
    Err(Error::Config(
        "Database path is required. Use .database_path() to set it.".to_string(),
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_cache_dir() -> Result<PathBuf> {
    Ok(bridge_desktop::default_cache_dir())
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_cache_dir() -> Result<PathBuf> {
    Err(Error::Config(
        "Cache directory is required. Use .cache_dir() to set it.".to_string(),
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::new()
        .map_err(|e| Error::Internal(format!("Failed to create default HttpClient: {}", e)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(capability_missing(
        "HttpClient",
        "HttpClient implementation is required for media transfers. \
         Desktop: enable the 'desktop-shims' feature to use the default ReqwestHttpClient. \
         Mobile: inject a client over the platform networking stack (URLSession/OkHttp).",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(capability_missing(
        "FileSystemAccess",
        "FileSystemAccess implementation is required for the payload cache. \
         Desktop: enable the 'desktop-shims' feature to use the default TokioFileSystem. \
         Mobile: inject sandboxed app-directory file access.",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_storage_estimator(cache_dir: &std::path::Path) -> Option<Arc<dyn StorageEstimator>> {
    Some(Arc::new(bridge_desktop::DesktopStorageEstimator::new(
        cache_dir.to_path_buf(),
    )))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_storage_estimator(_cache_dir: &std::path::Path) -> Option<Arc<dyn StorageEstimator>> {
    None
}

#[cfg(feature = "desktop-shims")]
fn provide_default_record_store(database_path: &std::path::Path) -> Result<Arc<dyn RecordStore>> {
    use bridge_desktop::SqliteRecordStore;
    use std::thread;
    use tokio::runtime::{Builder, Handle};

    let init_store = |path: PathBuf| -> Result<SqliteRecordStore> {
        let runtime = Builder::new_current_thread().enable_all().build().map_err(|e| {
            Error::Internal(format!(
                "Failed to create Tokio runtime for default RecordStore: {}",
                e
            ))
        })?;

        runtime
            .block_on(SqliteRecordStore::new(path))
            .map_err(|e| Error::Internal(format!("Failed to initialize default RecordStore: {}", e)))
    };

    // block_on cannot run on a runtime worker, so hop to a plain thread there.
    let store = match Handle::try_current() {
        Ok(_) => {
            let path = database_path.to_path_buf();
            thread::spawn(move || init_store(path))
                .join()
                .map_err(|_| {
                    Error::Internal(
                        "Worker thread panicked while creating default RecordStore".to_string(),
                    )
                })??
        }
        Err(_) => init_store(database_path.to_path_buf())?,
    };

    Ok(Arc::new(store))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_record_store(_database_path: &std::path::Path) -> Result<Arc<dyn RecordStore>> {
    Err(capability_missing(
        "RecordStore",
        "RecordStore implementation is required to persist downloads across restarts. \
         Desktop: enable the 'desktop-shims' feature to use the default SqliteRecordStore. \
         Web: inject an IndexedDB-backed store.",
    ))
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for constructing [`CoreConfig`] instances.
///
/// Call [`build()`](CoreConfigBuilder::build) to validate and create the final
/// config.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    record_store: Option<Arc<dyn RecordStore>>,
    byte_cache: Option<Arc<dyn ByteCache>>,
    storage_estimator: Option<Arc<dyn StorageEstimator>>,
    clock: Option<Arc<dyn Clock>>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the database path.
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().database_path("/path/to/offline.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the cache directory.
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Sets the HTTP client implementation.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the file system access implementation.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Sets the record store implementation.
    ///
    /// If not provided, a SQLite store at `database_path` is opened when the
    /// `desktop-shims` feature is enabled.
    pub fn record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.record_store = Some(store);
        self
    }

    /// Sets the payload cache implementation.
    pub fn byte_cache(mut self, cache: Arc<dyn ByteCache>) -> Self {
        self.byte_cache = Some(cache);
        self
    }

    /// Sets the storage estimator implementation.
    pub fn storage_estimator(mut self, estimator: Arc<dyn StorageEstimator>) -> Self {
        self.storage_estimator = Some(estimator);
        self
    }

    /// Sets the clock implementation.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Enables or disables the event bus.
    ///
    /// Default: true
    pub fn enable_event_bus(mut self, enabled: bool) -> Self {
        self.features.enable_event_bus = enabled;
        self
    }

    /// Sets the event bus buffer size.
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.features.event_buffer_size = size;
        self
    }

    /// Sets all feature flags at once.
    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// Returns an error if:
    /// - A required bridge is missing and no platform default exists
    /// - A path is missing and no platform default exists
    /// - Configuration values are invalid
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = match self.database_path {
            Some(path) => path,
            None => provide_default_database_path()?,
        };

        let cache_dir = match self.cache_dir {
            Some(path) => path,
            None => provide_default_cache_dir()?,
        };

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };

        let storage_estimator = self
            .storage_estimator
            .or_else(|| provide_default_storage_estimator(&cache_dir));

        let config = CoreConfig {
            record_store: match self.record_store {
                Some(store) => store,
                None => provide_default_record_store(&database_path)?,
            },
            database_path,
            cache_dir,
            http_client,
            file_system,
            byte_cache: self.byte_cache,
            storage_estimator,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{FileMetadata, HttpRequest, HttpStream, RecordTable};
    use bytes::Bytes;
    use std::path::Path;

    // Mock implementations for testing
    struct MockHttpClient;

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn open_stream(&self, _request: HttpRequest) -> BridgeResult<HttpStream> {
            unimplemented!("not used by config tests")
        }
    }

    struct MockFileSystem;

    #[async_trait]
    impl FileSystemAccess for MockFileSystem {
        async fn exists(&self, _path: &Path) -> BridgeResult<bool> {
            Ok(false)
        }
        async fn metadata(&self, _path: &Path) -> BridgeResult<FileMetadata> {
            unimplemented!("not used by config tests")
        }
        async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn read_file(&self, _path: &Path) -> BridgeResult<Bytes> {
            Ok(Bytes::new())
        }
        async fn write_file(&self, _path: &Path, _data: Bytes) -> BridgeResult<()> {
            Ok(())
        }
        async fn append_file(&self, _path: &Path, _data: Bytes) -> BridgeResult<()> {
            Ok(())
        }
        async fn delete_file(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn list_directory(&self, _path: &Path) -> BridgeResult<Vec<PathBuf>> {
            Ok(Vec::new())
        }
    }

    struct MockRecordStore;

    #[async_trait]
    impl RecordStore for MockRecordStore {
        async fn get_all(
            &self,
            _table: RecordTable,
        ) -> BridgeResult<Vec<(String, serde_json::Value)>> {
            Ok(Vec::new())
        }
        async fn get(
            &self,
            _table: RecordTable,
            _key: &str,
        ) -> BridgeResult<Option<serde_json::Value>> {
            Ok(None)
        }
        async fn put(
            &self,
            _table: RecordTable,
            _key: &str,
            _value: serde_json::Value,
        ) -> BridgeResult<()> {
            Ok(())
        }
        async fn delete(&self, _table: RecordTable, _key: &str) -> BridgeResult<()> {
            Ok(())
        }
        async fn clear(&self, _table: RecordTable) -> BridgeResult<()> {
            Ok(())
        }
    }

    fn with_mock_bridges() -> CoreConfigBuilder {
        CoreConfig::builder()
            .http_client(Arc::new(MockHttpClient))
            .file_system(Arc::new(MockFileSystem))
            .record_store(Arc::new(MockRecordStore))
    }

    #[test]
    fn test_builder_with_all_required_fields() {
        let config = with_mock_bridges()
            .database_path("/db/offline.db")
            .cache_dir("/cache")
            .build()
            .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/db/offline.db"));
        assert_eq!(config.cache_dir, PathBuf::from("/cache"));
        assert!(config.byte_cache.is_none());
        assert!(config.features.enable_event_bus);
    }

    #[test]
    fn test_validate_rejects_empty_paths() {
        let err = with_mock_bridges()
            .database_path("")
            .cache_dir("/cache")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Database path cannot be empty"));

        let err = with_mock_bridges()
            .database_path("/db/offline.db")
            .cache_dir("")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Cache directory cannot be empty"));
    }

    #[test]
    fn test_validate_rejects_zero_event_buffer() {
        let err = with_mock_bridges()
            .database_path("/db/offline.db")
            .cache_dir("/cache")
            .event_buffer_size(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("zero-sized buffer"));

        let config = with_mock_bridges()
            .database_path("/db/offline.db")
            .cache_dir("/cache")
            .enable_event_bus(false)
            .event_buffer_size(0)
            .build();
        assert!(config.is_ok());
    }

    #[test]
    fn test_feature_flags_default() {
        let flags = FeatureFlags::default();
        assert!(flags.enable_event_bus);
        assert_eq!(flags.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
    }

    #[test]
    fn test_config_debug_hides_bridges() {
        let config = with_mock_bridges()
            .database_path("/db/offline.db")
            .cache_dir("/cache")
            .build()
            .unwrap();

        let debug = format!("{:?}", config.clone());
        assert!(debug.contains("RecordStore { ... }"));
        assert!(debug.contains("/db/offline.db"));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_paths_without_shims() {
        let err = with_mock_bridges().cache_dir("/cache").build().unwrap_err();
        assert!(err.to_string().contains("Database path is required"));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_reports_missing_record_store() {
        let err = CoreConfig::builder()
            .database_path("/db/offline.db")
            .cache_dir("/cache")
            .http_client(Arc::new(MockHttpClient))
            .file_system(Arc::new(MockFileSystem))
            .build()
            .unwrap_err();

        match err {
            Error::CapabilityMissing { capability, message } => {
                assert_eq!(capability, "RecordStore");
                assert!(message.contains("persist downloads"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_reports_missing_http_client() {
        let err = CoreConfig::builder()
            .database_path("/db/offline.db")
            .cache_dir("/cache")
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::CapabilityMissing { ref capability, .. } if capability == "HttpClient"));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let config = CoreConfig::builder()
            .database_path(dir.path().join("offline.db"))
            .cache_dir(dir.path().join("cache"))
            .build()
            .expect("desktop defaults should succeed");

        assert!(config.storage_estimator.is_some());
        assert!(dir.path().join("offline.db").exists());
    }

    #[cfg(feature = "desktop-shims")]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_build_with_desktop_defaults_inside_runtime() {
        let dir = tempfile::tempdir().unwrap();

        let config = CoreConfig::builder()
            .database_path(dir.path().join("offline.db"))
            .cache_dir(dir.path().join("cache"))
            .build()
            .expect("desktop defaults should succeed inside runtime");

        assert!(config.validate().is_ok());
    }
}
