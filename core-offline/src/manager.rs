//! # Download Manager
//!
//! Queues downloads, dispatches at most `max_concurrent` transfers in FIFO
//! order and owns every status transition.
//!
//! ## Locking
//!
//! Locks are always taken in this order and never held across a call that
//! takes an earlier one:
//!
//! 1. `scheduler`: queue and active transfers
//! 2. `ledger`: quota reservations, also held for the whole of an eviction
//! 3. `writes`: serializes item persistence
//!
//! The in-memory item table is only published to after a successful write,
//! so a failed write leaves memory unchanged.

use crate::config::OfflineConfig;
use crate::error::{OfflineError, Result};
use crate::eviction::EvictionPlanner;
use crate::models::{
    DownloadId, DownloadItem, DownloadRequest, DownloadStatus, EvictionCandidate, ProgressUpdate,
    StatusEvent, StorageQuota,
};
use crate::quota::{QuotaEstimator, QuotaLedger};
use crate::repository::{
    DownloadRepository, StoreAccessRepository, StoreDownloadRepository,
};
use crate::transfer::{
    staging_key, TransferEngine, TransferJob, TransferObserver, TransferOutcome, STAGING_PREFIX,
};
use async_trait::async_trait;
use bridge_traits::{ByteCache, Clock, HttpClient, RecordStore, StorageEstimator};
use core_runtime::events::{CacheEvent, CoreEvent, DownloadEvent, EventBus};
use core_runtime::logging::redact_url;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Dependencies
// ============================================================================

/// Host bridges the offline engines run on
#[derive(Clone)]
pub struct OfflineDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub byte_cache: Arc<dyn ByteCache>,
    pub record_store: Arc<dyn RecordStore>,
    pub storage_estimator: Option<Arc<dyn StorageEstimator>>,
    pub clock: Arc<dyn Clock>,
    pub event_bus: Option<Arc<EventBus>>,
}

// ============================================================================
// Scheduler State
// ============================================================================

#[derive(Clone)]
struct ActiveTransfer {
    /// Tripped by `pause`
    cancel: CancellationToken,
    /// Tripped once the slot is released and the next item dispatched
    done: CancellationToken,
}

impl ActiveTransfer {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
        }
    }
}

#[derive(Default)]
struct Scheduler {
    queue: VecDeque<DownloadId>,
    active: HashMap<DownloadId, ActiveTransfer>,
}

enum Admission {
    Granted,
    Refused { needed: u64, available: u64 },
}

// ============================================================================
// Manager
// ============================================================================

/// Download orchestrator
///
/// Cheap to clone; clones share the same queue and transfers.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: OfflineConfig,
    engine: TransferEngine,
    repo: Arc<dyn DownloadRepository>,
    cache: Arc<dyn ByteCache>,
    planner: EvictionPlanner,
    quota: QuotaEstimator,
    clock: Arc<dyn Clock>,
    scheduler: Mutex<Scheduler>,
    ledger: Mutex<QuotaLedger>,
    writes: Mutex<()>,
    items: parking_lot::RwLock<HashMap<DownloadId, DownloadItem>>,
    listeners: parking_lot::Mutex<HashMap<DownloadId, mpsc::UnboundedSender<ProgressUpdate>>>,
    event_bus: Option<Arc<EventBus>>,
    shut_down: AtomicBool,
}

impl DownloadManager {
    pub fn new(config: OfflineConfig, deps: OfflineDependencies) -> Self {
        let repo: Arc<dyn DownloadRepository> =
            Arc::new(StoreDownloadRepository::new(Arc::clone(&deps.record_store)));
        let access = Arc::new(StoreAccessRepository::new(Arc::clone(&deps.record_store)));

        let engine = TransferEngine::new(deps.http_client, Arc::clone(&deps.byte_cache))
            .with_stall_timeout(config.stall_timeout);
        let planner = EvictionPlanner::new(
            Arc::clone(&deps.byte_cache),
            Arc::clone(&repo),
            access,
            Arc::clone(&deps.clock),
        );
        let quota = QuotaEstimator::new(deps.storage_estimator, config.clone());

        Self {
            inner: Arc::new(ManagerInner {
                config,
                engine,
                repo,
                cache: deps.byte_cache,
                planner,
                quota,
                clock: deps.clock,
                scheduler: Mutex::new(Scheduler::default()),
                ledger: Mutex::new(QuotaLedger::new()),
                writes: Mutex::new(()),
                items: parking_lot::RwLock::new(HashMap::new()),
                listeners: parking_lot::Mutex::new(HashMap::new()),
                event_bus: deps.event_bus,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Load persisted items and resume dispatch.
    ///
    /// Items persisted as downloading were interrupted by a restart; they
    /// come back paused, or queued when `resume_interrupted_on_start` is set.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        let inner = &self.inner;
        let mut items = inner.repo.load_all().await?;
        items.sort_by_key(|item| item.added_at);

        let mut queued = Vec::new();
        let mut recovered = 0usize;

        for mut item in items {
            if item.status == DownloadStatus::Downloading {
                item.apply(StatusEvent::Cancel)?;
                if inner.config.resume_interrupted_on_start {
                    item.apply(StatusEvent::Resume)?;
                }
                inner.repo.save(&item).await?;
                recovered += 1;
            }

            if item.status == DownloadStatus::Queued {
                queued.push(item.id);
            }
            inner.items.write().insert(item.id, item);
        }

        info!(
            total = inner.items.read().len(),
            queued = queued.len(),
            recovered,
            "Restored offline downloads"
        );

        inner.scheduler.lock().await.queue.extend(queued);
        inner.dispatch().await
    }

    /// Pause every transfer and stop dispatching.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        let active: Vec<DownloadId> = {
            let scheduler = self.inner.scheduler.lock().await;
            scheduler.active.keys().copied().collect()
        };

        for id in active {
            self.pause(id).await?;
        }
        info!("Download manager shut down");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Queue a download and trigger dispatch.
    ///
    /// A URL that is already tracked returns the existing id. Transfer
    /// failures are recorded on the item, never returned here.
    #[instrument(skip(self, request), fields(url = %redact_url(&request.url)))]
    pub async fn add(&self, request: DownloadRequest) -> Result<DownloadId> {
        let inner = &self.inner;
        if inner.shut_down.load(Ordering::SeqCst) {
            return Err(OfflineError::ShutDown);
        }

        let item = {
            let _write = inner.writes.lock().await;
            if let Some(existing) = inner.find_by_url(&request.url) {
                debug!(id = %existing, "URL already tracked");
                return Ok(existing);
            }

            let item = DownloadItem::new(request, inner.clock.now());
            inner.repo.save(&item).await?;
            inner.items.write().insert(item.id, item.clone());
            item
        };

        inner.scheduler.lock().await.queue.push_back(item.id);
        info!(id = %item.id, "Download queued");
        inner.emit(CoreEvent::Download(DownloadEvent::Queued {
            download_id: item.id.to_string(),
            content_id: item.content_id.clone(),
            title: item.title.clone(),
        }));

        inner.dispatch().await?;
        Ok(item.id)
    }

    /// Cancel an active transfer and wait for its slot to be released.
    ///
    /// No-op for items without an active transfer.
    #[instrument(skip(self))]
    pub async fn pause(&self, id: DownloadId) -> Result<()> {
        let inner = &self.inner;
        let active = inner.scheduler.lock().await.active.get(&id).cloned();
        let Some(active) = active else {
            debug!(%id, "Nothing to pause");
            return Ok(());
        };

        active.cancel.cancel();
        active.done.cancelled().await;

        // Settlement could not persist; retry so the caller sees the failure.
        if inner.snapshot(&id).map(|item| item.status) == Some(DownloadStatus::Downloading) {
            inner
                .update_item(&id, |item| item.apply(StatusEvent::Cancel))
                .await?;
        }
        Ok(())
    }

    /// Re-queue a paused item; the next request continues at its offset.
    #[instrument(skip(self))]
    pub async fn resume(&self, id: DownloadId) -> Result<()> {
        let inner = &self.inner;
        inner
            .update_item(&id, |item| item.apply(StatusEvent::Resume))
            .await?;

        inner.scheduler.lock().await.queue.push_back(id);
        inner.emit(CoreEvent::Download(DownloadEvent::Resumed {
            download_id: id.to_string(),
        }));
        inner.dispatch().await
    }

    /// Re-queue a failed item from zero.
    #[instrument(skip(self))]
    pub async fn retry(&self, id: DownloadId) -> Result<()> {
        let inner = &self.inner;
        let item = inner.require(&id)?;
        item.status.transition(StatusEvent::Retry)?;

        inner.cache.delete(&staging_key(&id)).await?;
        inner
            .update_item(&id, |item| {
                item.apply(StatusEvent::Retry)?;
                item.reset_transfer();
                Ok(())
            })
            .await?;

        inner.scheduler.lock().await.queue.push_back(id);
        inner.emit(CoreEvent::Download(DownloadEvent::Queued {
            download_id: id.to_string(),
            content_id: item.content_id,
            title: item.title,
        }));
        inner.dispatch().await
    }

    /// Delete an item, its payload and its staged bytes.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: DownloadId) -> Result<()> {
        let inner = &self.inner;
        let item = inner.require(&id)?;

        inner.scheduler.lock().await.queue.retain(|queued| *queued != id);
        self.pause(id).await?;

        inner.cache.delete(&item.url).await?;
        inner.cache.delete(&staging_key(&id)).await?;
        {
            let _write = inner.writes.lock().await;
            inner.repo.delete(&id).await?;
            inner.items.write().remove(&id);
        }
        inner.listeners.lock().remove(&id);
        inner.ledger.lock().await.release(&id);

        info!(%id, "Download removed");
        inner.emit(CoreEvent::Download(DownloadEvent::Removed {
            download_id: id.to_string(),
        }));
        Ok(())
    }

    pub fn get(&self, id: DownloadId) -> Option<DownloadItem> {
        self.inner.snapshot(&id)
    }

    /// Every item, oldest first.
    pub fn get_all(&self) -> Vec<DownloadItem> {
        self.inner.all_items()
    }

    /// Toggle eviction exemption.
    #[instrument(skip(self))]
    pub async fn set_pin(&self, id: DownloadId, pinned: bool) -> Result<()> {
        self.inner
            .update_item(&id, |item| {
                item.pinned = pinned;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Subscribe to per-chunk progress of one item.
    ///
    /// Replaces any earlier listener for the same item.
    pub fn on_progress(&self, id: DownloadId) -> Result<mpsc::UnboundedReceiver<ProgressUpdate>> {
        self.inner.require(&id)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.listeners.lock().insert(id, tx);
        Ok(rx)
    }

    pub fn off_progress(&self, id: DownloadId) {
        self.inner.listeners.lock().remove(&id);
    }

    // ------------------------------------------------------------------------
    // Quota & Eviction
    // ------------------------------------------------------------------------

    /// Bytes held by tracked items, counting partial transfers.
    pub fn tracked_usage(&self) -> u64 {
        self.inner.tracked_usage()
    }

    pub async fn get_quota(&self) -> StorageQuota {
        self.inner.quota.get_quota(self.inner.tracked_usage()).await
    }

    pub async fn has_space(&self, size: u64) -> bool {
        self.inner
            .quota
            .has_space(size, self.inner.tracked_usage())
            .await
    }

    pub async fn needs_eviction(&self) -> bool {
        self.inner
            .quota
            .needs_eviction(self.inner.tracked_usage())
            .await
    }

    pub(crate) fn quota(&self) -> &QuotaEstimator {
        &self.inner.quota
    }

    pub async fn get_eviction_candidates(&self) -> Result<Vec<EvictionCandidate>> {
        self.inner
            .planner
            .get_eviction_candidates(&self.inner.all_items())
            .await
    }

    /// Evict stale items until `target_bytes` are freed.
    ///
    /// Runs under the quota ledger lock so it never overlaps admission.
    #[instrument(skip(self))]
    pub async fn evict(&self, target_bytes: u64) -> Result<Vec<DownloadId>> {
        let _ledger = self.inner.ledger.lock().await;
        self.inner.evict_locked(target_bytes).await
    }

    pub async fn update_last_accessed(&self, content_id: &str) -> Result<()> {
        self.inner.planner.update_last_accessed(content_id).await
    }

    /// Remove every item, payload, staged transfer and access record.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> Result<usize> {
        let inner = &self.inner;
        let active: Vec<DownloadId> = {
            let mut scheduler = inner.scheduler.lock().await;
            scheduler.queue.clear();
            scheduler.active.keys().copied().collect()
        };
        for id in active {
            self.pause(id).await?;
        }

        let items = inner.all_items();
        for item in &items {
            inner.cache.delete(&item.url).await?;
        }
        inner.cache.delete_by_prefix(STAGING_PREFIX).await?;

        {
            let _write = inner.writes.lock().await;
            inner.repo.clear().await?;
            inner.items.write().clear();
        }
        inner.planner.clear_access().await?;
        inner.listeners.lock().clear();
        inner.ledger.lock().await.clear();

        info!(items = items.len(), "Cleared offline downloads");
        inner.emit(CoreEvent::Cache(CacheEvent::Cleared {
            items_removed: items.len(),
        }));
        Ok(items.len())
    }
}

// ============================================================================
// Internals
// ============================================================================

impl ManagerInner {
    fn emit(&self, event: CoreEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(event);
        }
    }

    fn snapshot(&self, id: &DownloadId) -> Option<DownloadItem> {
        self.items.read().get(id).cloned()
    }

    fn require(&self, id: &DownloadId) -> Result<DownloadItem> {
        self.snapshot(id)
            .ok_or_else(|| OfflineError::NotFound(id.to_string()))
    }

    fn find_by_url(&self, url: &str) -> Option<DownloadId> {
        self.items
            .read()
            .values()
            .find(|item| item.url == url)
            .map(|item| item.id)
    }

    fn all_items(&self) -> Vec<DownloadItem> {
        let mut items: Vec<DownloadItem> = self.items.read().values().cloned().collect();
        items.sort_by_key(|item| item.added_at);
        items
    }

    fn tracked_usage(&self) -> u64 {
        self.items
            .read()
            .values()
            .map(|item| match item.status {
                DownloadStatus::Completed => item.footprint(),
                _ => item.bytes_downloaded,
            })
            .sum()
    }

    /// Snapshot, mutate, persist, then publish.
    async fn update_item<F>(&self, id: &DownloadId, mutate: F) -> Result<DownloadItem>
    where
        F: FnOnce(&mut DownloadItem) -> Result<()>,
    {
        let _write = self.writes.lock().await;
        let mut item = self.require(id)?;
        mutate(&mut item)?;
        self.repo.save(&item).await?;
        self.items.write().insert(*id, item.clone());
        Ok(item)
    }

    fn notify(&self, item: &DownloadItem) {
        let mut listeners = self.listeners.lock();
        if let Some(tx) = listeners.get(&item.id) {
            if tx.send(item.progress_update()).is_err() {
                listeners.remove(&item.id);
            }
        }
    }

    /// Start queued items until every slot is taken.
    async fn dispatch(self: &Arc<Self>) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut scheduler = self.scheduler.lock().await;
        // Re-queued while their previous transfer still holds a slot; the
        // dispatch that follows its release picks them up.
        let mut settling = Vec::new();
        let result = self.fill_slots(&mut *scheduler, &mut settling).await;
        for id in settling.into_iter().rev() {
            scheduler.queue.push_front(id);
        }
        result
    }

    async fn fill_slots(
        self: &Arc<Self>,
        scheduler: &mut Scheduler,
        settling: &mut Vec<DownloadId>,
    ) -> Result<()> {
        while scheduler.active.len() < self.config.max_concurrent {
            let Some(id) = scheduler.queue.pop_front() else {
                break;
            };
            let Some(item) = self.snapshot(&id) else {
                continue;
            };
            if item.status != DownloadStatus::Queued {
                continue;
            }
            if scheduler.active.contains_key(&id) {
                settling.push(id);
                continue;
            }

            if let Admission::Refused { needed, available } = self.admit(&item).await? {
                let message = OfflineError::QuotaExceeded { needed, available }.to_string();
                warn!(%id, needed, available, "Admission refused");
                self.update_item(&id, |item| item.fail(message.clone()))
                    .await?;
                self.emit(CoreEvent::Download(DownloadEvent::Failed {
                    download_id: id.to_string(),
                    message,
                }));
                continue;
            }

            let started = match self
                .update_item(&id, |item| item.apply(StatusEvent::Dispatch))
                .await
            {
                Ok(started) => started,
                Err(e) => {
                    self.ledger.lock().await.release(&id);
                    scheduler.queue.push_front(id);
                    return Err(e);
                }
            };

            debug!(%id, offset = started.bytes_downloaded, "Dispatching transfer");
            self.emit(CoreEvent::Download(DownloadEvent::Started {
                download_id: id.to_string(),
                resume_from: started.bytes_downloaded,
            }));

            let active = ActiveTransfer::new();
            scheduler.active.insert(id, active.clone());
            tokio::spawn(Arc::clone(self).run_transfer(TransferJob::from(&started), active));
        }

        Ok(())
    }

    /// Reserve quota for `item`, evicting first when configured.
    async fn admit(&self, item: &DownloadItem) -> Result<Admission> {
        let mut ledger = self.ledger.lock().await;
        let needed = item
            .size
            .unwrap_or(self.config.unknown_size_reservation)
            .saturating_sub(item.bytes_downloaded);

        let mut available = self.available(&ledger).await;
        if needed > available && self.config.evict_on_admission {
            let evicted = self.evict_locked(needed - available).await?;
            debug!(count = evicted.len(), "Evicted for admission");
            available = self.available(&ledger).await;
        }

        if needed > available {
            return Ok(Admission::Refused { needed, available });
        }

        ledger.reserve(item.id, needed, item.bytes_downloaded);
        Ok(Admission::Granted)
    }

    /// Quota left once usage and the unstaged part of every reservation
    /// are accounted for.
    async fn available(&self, ledger: &QuotaLedger) -> u64 {
        let quota = self.quota.get_quota(self.tracked_usage()).await;
        let outstanding = {
            let items = self.items.read();
            ledger.outstanding(|id| items.get(id).map_or(0, |item| item.bytes_downloaded))
        };
        quota
            .quota
            .saturating_sub(quota.usage.saturating_add(outstanding))
    }

    /// Caller must hold the ledger lock.
    ///
    /// Items are unpublished one by one as their records are deleted, so a
    /// failed pass leaves memory in step with the store.
    async fn evict_locked(&self, target_bytes: u64) -> Result<Vec<DownloadId>> {
        let _writes = self.writes.lock().await;
        let evicted = self
            .planner
            .evict(target_bytes, &self.all_items(), |candidate| {
                self.items.write().remove(&candidate.id);
                self.listeners.lock().remove(&candidate.id);
                self.emit(CoreEvent::Cache(CacheEvent::Evicted {
                    download_id: candidate.id.to_string(),
                    content_id: candidate.content_id.clone(),
                    bytes_freed: candidate.size,
                }));
            })
            .await?;

        Ok(evicted.into_iter().map(|candidate| candidate.id).collect())
    }

    fn run_transfer(self: Arc<Self>, job: TransferJob, active: ActiveTransfer) -> BoxFuture<'static, ()> {
        async move {
            let id = job.id;
            let relay = ProgressRelay {
                inner: Arc::clone(&self),
                id,
            };

            let outcome = self.engine.run(job, &relay, active.cancel.clone()).await;
            if let Err(e) = self.settle(&id, outcome).await {
                error!(%id, error = %e, "Failed to record transfer outcome");
            }

            self.scheduler.lock().await.active.remove(&id);
            if let Err(e) = self.dispatch().await {
                error!(error = %e, "Dispatch after transfer failed");
            }
            active.done.cancel();
        }
        .boxed()
    }

    async fn settle(&self, id: &DownloadId, outcome: TransferOutcome) -> Result<()> {
        self.ledger.lock().await.release(id);

        match outcome {
            TransferOutcome::Completed { bytes } => {
                let now = self.clock.now();
                let item = self
                    .update_item(id, |item| item.complete(bytes, now))
                    .await?;
                self.notify(&item);
                info!(%id, bytes, "Download completed");
                self.emit(CoreEvent::Download(DownloadEvent::Completed {
                    download_id: id.to_string(),
                    content_id: item.content_id,
                    bytes,
                }));
            }
            TransferOutcome::Cancelled => {
                let item = self
                    .update_item(id, |item| item.apply(StatusEvent::Cancel))
                    .await?;
                info!(%id, bytes = item.bytes_downloaded, "Download paused");
                self.emit(CoreEvent::Download(DownloadEvent::Paused {
                    download_id: id.to_string(),
                    bytes_downloaded: item.bytes_downloaded,
                }));
            }
            TransferOutcome::Failed(e) => {
                let message = e.to_string();
                self.update_item(id, |item| item.fail(message.clone()))
                    .await?;
                warn!(%id, error = %message, "Download failed");
                self.emit(CoreEvent::Download(DownloadEvent::Failed {
                    download_id: id.to_string(),
                    message,
                }));
            }
        }

        Ok(())
    }
}

/// Persists chunk progress and forwards it to the item's listener
struct ProgressRelay {
    inner: Arc<ManagerInner>,
    id: DownloadId,
}

#[async_trait]
impl TransferObserver for ProgressRelay {
    async fn chunk_staged(
        &self,
        bytes: u64,
        total: Option<u64>,
    ) -> std::result::Result<(), String> {
        let item = self
            .inner
            .update_item(&self.id, |item| {
                item.record_progress(bytes, total);
                Ok(())
            })
            .await
            .map_err(|e| e.to_string())?;

        self.inner.notify(&item);
        Ok(())
    }
}
