//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, filesystem,
//! record storage, payload cache, storage estimation) into the offline media
//! core. Desktop apps typically keep the default `desktop-shims` feature,
//! which lets [`CoreConfig`] fill in reqwest, tokio fs and SQLite adapters;
//! mobile hosts inject their own bridges through the config builder.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::{CoreService, OfflineConfig};
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/offline.db")
//!     .cache_dir("/data/payloads")
//!     .build()?;
//! let core = CoreService::bootstrap(config, OfflineConfig::default()).await?;
//! let id = core.offline().add(request).await?;
//! ```

pub mod error;

pub use core_offline::OfflineConfig;
pub use error::{CoreError, Result};

use std::path::Path;
use std::sync::Arc;

use bridge_traits::{
    ByteCache, Clock, FileSystemAccess, HttpClient, RecordStore, StorageEstimator, SystemClock,
};
use core_offline::{FileByteCache, OfflineDependencies, OfflineMediaService};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, EventStream};
use tracing::{info, instrument};

/// Aggregated handle to all bridge dependencies the core requires.
pub struct CoreDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub file_system: Arc<dyn FileSystemAccess>,
    pub record_store: Arc<dyn RecordStore>,
    pub byte_cache: Arc<dyn ByteCache>,
    pub storage_estimator: Option<Arc<dyn StorageEstimator>>,
    pub clock: Arc<dyn Clock>,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    ///
    /// No storage estimator is attached and the system clock is used; see
    /// [`with_storage_estimator`](Self::with_storage_estimator) and
    /// [`with_clock`](Self::with_clock).
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        file_system: Arc<dyn FileSystemAccess>,
        record_store: Arc<dyn RecordStore>,
        byte_cache: Arc<dyn ByteCache>,
    ) -> Self {
        Self {
            http_client,
            file_system,
            record_store,
            byte_cache,
            storage_estimator: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_storage_estimator(mut self, estimator: Arc<dyn StorageEstimator>) -> Self {
        self.storage_estimator = Some(estimator);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn offline(&self, event_bus: Option<Arc<EventBus>>) -> OfflineDependencies {
        OfflineDependencies {
            http_client: Arc::clone(&self.http_client),
            byte_cache: Arc::clone(&self.byte_cache),
            record_store: Arc::clone(&self.record_store),
            storage_estimator: self.storage_estimator.clone(),
            clock: Arc::clone(&self.clock),
            event_bus,
        }
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    deps: Arc<CoreDependencies>,
    offline: Arc<OfflineMediaService>,
    event_bus: Option<Arc<EventBus>>,
}

impl CoreService {
    /// Create a service from explicit dependencies without initializing it.
    pub fn new(
        deps: CoreDependencies,
        offline_config: OfflineConfig,
        event_bus: Option<Arc<EventBus>>,
    ) -> Result<Self> {
        let offline =
            OfflineMediaService::new(offline_config, deps.offline(event_bus.clone()))?;

        Ok(Self {
            deps: Arc::new(deps),
            offline: Arc::new(offline),
            event_bus,
        })
    }

    /// Build and initialize the core from a validated [`CoreConfig`].
    ///
    /// When the config carries no payload cache, a [`FileByteCache`] rooted at
    /// `cache_dir` is created. Interrupted downloads are reconciled before
    /// this returns.
    #[instrument(skip_all, fields(cache_dir = ?config.cache_dir))]
    pub async fn bootstrap(config: CoreConfig, offline_config: OfflineConfig) -> Result<Self> {
        config.validate()?;

        let byte_cache = match config.byte_cache.clone() {
            Some(cache) => cache,
            None => open_file_cache(Arc::clone(&config.file_system), &config.cache_dir).await?,
        };

        let mut deps = CoreDependencies::new(
            Arc::clone(&config.http_client),
            Arc::clone(&config.file_system),
            Arc::clone(&config.record_store),
            byte_cache,
        )
        .with_clock(Arc::clone(&config.clock));
        deps.storage_estimator = config.storage_estimator.clone();

        let event_bus = config
            .features
            .enable_event_bus
            .then(|| Arc::new(EventBus::new(config.features.event_buffer_size)));

        let service = Self::new(deps, offline_config, event_bus)?;
        service.initialize().await?;

        info!(
            downloads = service.offline.get_all().len(),
            "Offline media core ready"
        );
        Ok(service)
    }

    pub async fn initialize(&self) -> Result<()> {
        self.offline.initialize().await?;
        Ok(())
    }

    /// Pause in-flight transfers and stop background maintenance.
    pub async fn shutdown(&self) -> Result<()> {
        self.offline.shutdown().await?;
        info!("Offline media core shut down");
        Ok(())
    }

    /// Download orchestration, offline lookup and quota management.
    pub fn offline(&self) -> &OfflineMediaService {
        &self.offline
    }

    pub fn event_bus(&self) -> Option<Arc<EventBus>> {
        self.event_bus.clone()
    }

    /// Subscribe to download and cache events, if the event bus is enabled.
    pub fn subscribe_events(&self) -> Option<EventStream> {
        self.event_bus
            .as_ref()
            .map(|bus| EventStream::new(bus.subscribe()))
    }

    /// Access the bridge dependencies being used by the service.
    pub fn dependencies(&self) -> Arc<CoreDependencies> {
        Arc::clone(&self.deps)
    }
}

async fn open_file_cache(
    fs: Arc<dyn FileSystemAccess>,
    root: &Path,
) -> Result<Arc<dyn ByteCache>> {
    let cache = FileByteCache::new(fs, root);
    cache.initialize().await.map_err(|e| {
        CoreError::InitializationFailed(format!(
            "Failed to create payload cache at {}: {}",
            root.display(),
            e
        ))
    })?;
    Ok(Arc::new(cache))
}
