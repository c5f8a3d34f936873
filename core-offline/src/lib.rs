//! # Core Offline Module
//!
//! Offline availability for streamed media: queued, resumable downloads into
//! a payload cache, bounded by a storage quota with priority-ranked eviction.
//!
//! ## Overview
//!
//! - [`DownloadManager`] queues downloads and runs at most `max_concurrent`
//!   transfers in FIFO order, with pause/resume/retry/remove
//! - [`TransferEngine`] streams one payload with `Range` resume into staging,
//!   then commits it under the source URL
//! - [`QuotaEstimator`] combines the platform estimate with device defaults
//! - [`EvictionPlanner`] ranks completed, unpinned items by staleness
//! - [`OfflineMediaService`] ties them together behind one façade
//!
//! ## Persistence
//!
//! Items live in the `downloads` table of the host [`RecordStore`] and
//! playback timestamps in `media-access`; both survive restarts. Payloads
//! live in a [`ByteCache`], by default the file-backed [`FileByteCache`].
//!
//! [`RecordStore`]: bridge_traits::RecordStore
//! [`ByteCache`]: bridge_traits::ByteCache

pub mod cache;
pub mod config;
pub mod error;
pub mod eviction;
pub mod manager;
pub mod models;
pub mod quota;
pub mod repository;
pub mod service;
pub mod transfer;

pub use cache::FileByteCache;
pub use config::OfflineConfig;
pub use error::{OfflineError, Result, TransferError};
pub use eviction::EvictionPlanner;
pub use manager::{DownloadManager, OfflineDependencies};
pub use models::{
    DownloadId, DownloadItem, DownloadRequest, DownloadStatus, EvictionCandidate,
    ProgressUpdate, StatusEvent, StorageQuota,
};
pub use quota::{QuotaEstimator, QuotaLedger};
pub use repository::{
    AccessRepository, DownloadRepository, StoreAccessRepository, StoreDownloadRepository,
};
pub use service::{MaintenanceReport, OfflineMediaService};
pub use transfer::{TransferEngine, TransferJob, TransferObserver, TransferOutcome};
