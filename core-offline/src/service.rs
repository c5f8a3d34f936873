//! # Offline Media Service
//!
//! Façade over the download manager, payload cache and eviction planner.
//! Constructed explicitly and driven through [`initialize`](OfflineMediaService::initialize)
//! and [`shutdown`](OfflineMediaService::shutdown).
//!
//! ## Usage
//!
//! ```ignore
//! let service = OfflineMediaService::new(OfflineConfig::default(), deps)?;
//! service.initialize().await?;
//!
//! let id = service.add(DownloadRequest::new("movie-1", "Movie", url)).await?;
//! let mut progress = service.on_progress(id)?;
//! while let Some(update) = progress.recv().await {
//!     println!("{}%", update.percentage);
//! }
//!
//! if let Some(local) = service.get_offline_url(url).await? {
//!     player.load(local);
//! }
//! ```

use crate::config::OfflineConfig;
use crate::error::{OfflineError, Result};
use crate::manager::{DownloadManager, OfflineDependencies};
use crate::models::{
    DownloadId, DownloadItem, DownloadRequest, EvictionCandidate, ProgressUpdate, StorageQuota,
};
use bridge_traits::ByteCache;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

const STATE_NEW: u8 = 0;
const STATE_READY: u8 = 1;
const STATE_SHUT_DOWN: u8 = 2;

/// Outcome of one maintenance pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenanceReport {
    pub before: StorageQuota,
    pub after: StorageQuota,
    pub evicted: Vec<DownloadId>,
}

struct MaintenanceTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Offline download and storage management entry point
pub struct OfflineMediaService {
    manager: DownloadManager,
    cache: Arc<dyn ByteCache>,
    config: OfflineConfig,
    event_bus: Option<Arc<EventBus>>,
    maintenance: parking_lot::Mutex<Option<MaintenanceTask>>,
    state: AtomicU8,
}

impl OfflineMediaService {
    /// Build the service; nothing is loaded until [`initialize`](Self::initialize).
    ///
    /// # Errors
    ///
    /// Returns [`OfflineError::Config`] when the configuration is invalid.
    pub fn new(config: OfflineConfig, deps: OfflineDependencies) -> Result<Self> {
        config.validate().map_err(OfflineError::Config)?;

        let cache = Arc::clone(&deps.byte_cache);
        let event_bus = deps.event_bus.clone();
        let manager = DownloadManager::new(config.clone(), deps);

        Ok(Self {
            manager,
            cache,
            config,
            event_bus,
            maintenance: parking_lot::Mutex::new(None),
            state: AtomicU8::new(STATE_NEW),
        })
    }

    /// Restore persisted downloads, resume dispatch and start periodic
    /// maintenance when configured. Calling it twice is a no-op.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        match self.state.load(Ordering::SeqCst) {
            STATE_READY => return Ok(()),
            STATE_SHUT_DOWN => return Err(OfflineError::ShutDown),
            _ => {}
        }

        self.manager.initialize().await?;

        if let Some(period) = self.config.maintenance_interval {
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(maintenance_loop(
                self.manager.clone(),
                self.event_bus.clone(),
                period,
                cancel.clone(),
            ));
            *self.maintenance.lock() = Some(MaintenanceTask { cancel, handle });
            debug!(?period, "Started periodic maintenance");
        }

        self.state.store(STATE_READY, Ordering::SeqCst);
        info!("Offline media service initialized");
        Ok(())
    }

    /// Stop maintenance and pause every active transfer.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        if self.state.swap(STATE_SHUT_DOWN, Ordering::SeqCst) == STATE_SHUT_DOWN {
            return Ok(());
        }

        let task = self.maintenance.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                error!(error = %e, "Maintenance task ended abnormally");
            }
        }

        self.manager.shutdown().await?;
        info!("Offline media service shut down");
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state.load(Ordering::SeqCst) {
            STATE_READY => Ok(()),
            STATE_SHUT_DOWN => Err(OfflineError::ShutDown),
            _ => Err(OfflineError::NotInitialized),
        }
    }

    /// Underlying download manager.
    pub fn manager(&self) -> &DownloadManager {
        &self.manager
    }

    // ------------------------------------------------------------------------
    // Lifecycle API
    // ------------------------------------------------------------------------

    pub async fn add(&self, request: DownloadRequest) -> Result<DownloadId> {
        self.ensure_ready()?;
        self.manager.add(request).await
    }

    pub async fn pause(&self, id: DownloadId) -> Result<()> {
        self.ensure_ready()?;
        self.manager.pause(id).await
    }

    pub async fn resume(&self, id: DownloadId) -> Result<()> {
        self.ensure_ready()?;
        self.manager.resume(id).await
    }

    pub async fn retry(&self, id: DownloadId) -> Result<()> {
        self.ensure_ready()?;
        self.manager.retry(id).await
    }

    pub async fn remove(&self, id: DownloadId) -> Result<()> {
        self.ensure_ready()?;
        self.manager.remove(id).await
    }

    pub fn get(&self, id: DownloadId) -> Option<DownloadItem> {
        self.manager.get(id)
    }

    pub fn get_all(&self) -> Vec<DownloadItem> {
        self.manager.get_all()
    }

    pub async fn set_pin(&self, id: DownloadId, pinned: bool) -> Result<()> {
        self.ensure_ready()?;
        self.manager.set_pin(id, pinned).await
    }

    pub fn on_progress(&self, id: DownloadId) -> Result<mpsc::UnboundedReceiver<ProgressUpdate>> {
        self.manager.on_progress(id)
    }

    pub fn off_progress(&self, id: DownloadId) {
        self.manager.off_progress(id)
    }

    // ------------------------------------------------------------------------
    // Playback Resolution
    // ------------------------------------------------------------------------

    /// True when a committed payload exists for `url`.
    pub async fn is_available_offline(&self, url: &str) -> Result<bool> {
        Ok(self.cache.contains(url).await?)
    }

    /// Local locator for the committed payload of `url`.
    pub async fn get_offline_url(&self, url: &str) -> Result<Option<String>> {
        Ok(self.cache.locate(url).await?)
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    pub async fn get_quota(&self) -> StorageQuota {
        self.manager.get_quota().await
    }

    pub async fn has_space(&self, size: u64) -> bool {
        self.manager.has_space(size).await
    }

    pub async fn needs_eviction(&self) -> bool {
        self.manager.needs_eviction().await
    }

    pub async fn get_eviction_candidates(&self) -> Result<Vec<EvictionCandidate>> {
        self.manager.get_eviction_candidates().await
    }

    pub async fn evict(&self, target_bytes: u64) -> Result<Vec<DownloadId>> {
        self.ensure_ready()?;
        self.manager.evict(target_bytes).await
    }

    pub async fn update_last_accessed(&self, content_id: &str) -> Result<()> {
        self.manager.update_last_accessed(content_id).await
    }

    pub async fn clear_all(&self) -> Result<usize> {
        self.ensure_ready()?;
        self.manager.clear_all().await
    }

    /// Evict down to the target percentage when usage crosses the threshold.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        self.ensure_ready()?;
        maintain(&self.manager, self.event_bus.as_deref()).await
    }
}

#[instrument(skip(manager, event_bus))]
async fn maintain(
    manager: &DownloadManager,
    event_bus: Option<&EventBus>,
) -> Result<MaintenanceReport> {
    let before = manager.get_quota().await;
    if !manager.quota().exceeds_threshold(&before) {
        debug!(percentage = before.percentage, "Storage below eviction threshold");
        return Ok(MaintenanceReport {
            before,
            after: before,
            evicted: Vec::new(),
        });
    }

    info!(
        usage = before.usage,
        quota = before.quota,
        percentage = before.percentage,
        "Storage above eviction threshold"
    );
    if let Some(bus) = event_bus {
        let _ = bus.emit(CoreEvent::Cache(CacheEvent::QuotaPressure {
            usage: before.usage,
            quota: before.quota,
            percent: before.percentage.round().clamp(0.0, 255.0) as u8,
        }));
    }

    let target = manager.quota().bytes_above_target(&before);
    let evicted = manager.evict(target).await?;
    let after = manager.get_quota().await;

    Ok(MaintenanceReport {
        before,
        after,
        evicted,
    })
}

async fn maintenance_loop(
    manager: DownloadManager,
    event_bus: Option<Arc<EventBus>>,
    period: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = maintain(&manager, event_bus.as_deref()).await {
                    error!(error = %e, "Scheduled maintenance failed");
                }
            }
        }
    }
}
