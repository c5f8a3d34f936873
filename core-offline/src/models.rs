//! # Offline Download Models
//!
//! Domain types shared by the orchestrator, transfer engine and eviction
//! planner.
//!
//! ## State Machine
//!
//! ```text
//!            Dispatch            Finish
//!   Queued ──────────> Downloading ──────> Completed
//!     │  ^                 │   │
//!     │  │ Resume    Cancel│   │Fail
//!     │  └──── Paused <────┘   v
//!     └──────── Fail ───────> Failed ──Retry──> Queued
//! ```
//!
//! Every `{status, event}` pair is handled by [`DownloadStatus::transition`];
//! unlisted pairs are rejected with [`OfflineError::InvalidTransition`].

use crate::error::{OfflineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a download item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadId(Uuid);

impl DownloadId {
    /// Create a new random download ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a download ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| OfflineError::InvalidId(format!("{}: {}", s, e)))
    }
}

impl Default for DownloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DownloadId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// Lifecycle status of a download item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Waiting for a transfer slot
    Queued,
    /// Transfer in progress
    Downloading,
    /// Cancelled with partial bytes retained
    Paused,
    /// Payload committed to the cache
    Completed,
    /// Transfer or admission failed
    Failed,
}

/// Inputs to the download state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// Scheduler granted a transfer slot
    Dispatch,
    /// Transfer committed its payload
    Finish,
    /// Transfer cancelled by `pause`
    Cancel,
    /// Transfer failed or admission was refused
    Fail,
    /// `resume` on a paused item
    Resume,
    /// `retry` on a failed item
    Retry,
}

impl DownloadStatus {
    /// Compute the status reached by applying `event`.
    ///
    /// # Errors
    ///
    /// Returns [`OfflineError::InvalidTransition`] when the pair is not part
    /// of the state machine.
    pub fn transition(self, event: StatusEvent) -> Result<DownloadStatus> {
        use DownloadStatus::*;
        use StatusEvent::*;

        let next = match (self, event) {
            (Queued, Dispatch) => Some(Downloading),
            (Queued, Fail) => Some(Failed),
            (Queued, Finish | Cancel | Resume | Retry) => None,

            (Downloading, Finish) => Some(Completed),
            (Downloading, Cancel) => Some(Paused),
            (Downloading, Fail) => Some(Failed),
            (Downloading, Dispatch | Resume | Retry) => None,

            (Paused, Resume) => Some(Queued),
            (Paused, Dispatch | Finish | Cancel | Fail | Retry) => None,

            (Completed, Dispatch | Finish | Cancel | Fail | Resume | Retry) => None,

            (Failed, Retry) => Some(Queued),
            (Failed, Dispatch | Finish | Cancel | Fail | Resume) => None,
        };

        next.ok_or_else(|| OfflineError::InvalidTransition {
            from: self.to_string(),
            event: format!("{:?}", event),
        })
    }

    /// Queued or downloading; such items are never evicted.
    pub fn is_active(&self) -> bool {
        matches!(self, DownloadStatus::Queued | DownloadStatus::Downloading)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Queued => "queued",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Download Item
// ============================================================================

/// Parameters for [`DownloadManager::add`](crate::DownloadManager::add)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub content_id: String,
    pub title: String,
    pub url: String,
    pub pinned: bool,
}

impl DownloadRequest {
    pub fn new(
        content_id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            title: title.into(),
            url: url.into(),
            pinned: false,
        }
    }

    /// Exempt the item from eviction.
    pub fn pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }
}

/// A media object being made available offline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub id: DownloadId,
    /// Logical media identifier used for access tracking
    pub content_id: String,
    pub title: String,
    /// Source URL; also the payload cache key
    pub url: String,
    /// Declared size, unknown until the first response reports it
    pub size: Option<u64>,
    pub status: DownloadStatus,
    /// Whole-number percentage, 0 while the size is unknown
    pub progress: u8,
    pub bytes_downloaded: u64,
    pub error: Option<String>,
    pub pinned: bool,
    pub added_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DownloadItem {
    /// Create a queued item with no bytes transferred.
    pub fn new(request: DownloadRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: DownloadId::new(),
            content_id: request.content_id,
            title: request.title,
            url: request.url,
            size: None,
            status: DownloadStatus::Queued,
            progress: 0,
            bytes_downloaded: 0,
            error: None,
            pinned: request.pinned,
            added_at: now,
            completed_at: None,
        }
    }

    /// Apply a state machine event to this item.
    pub fn apply(&mut self, event: StatusEvent) -> Result<()> {
        self.status = self.status.transition(event)?;
        Ok(())
    }

    /// Record transferred bytes and, when reported, the total size.
    pub fn record_progress(&mut self, bytes: u64, total: Option<u64>) {
        if total.is_some() {
            self.size = total;
        }
        self.bytes_downloaded = bytes;
        self.progress = compute_progress(bytes, self.size);
    }

    /// Mark the item completed at `now`.
    ///
    /// When the server never reported a length, the received byte count
    /// becomes the size.
    pub fn complete(&mut self, bytes: u64, now: DateTime<Utc>) -> Result<()> {
        self.apply(StatusEvent::Finish)?;
        self.size = Some(self.size.unwrap_or(bytes));
        self.bytes_downloaded = bytes;
        self.progress = 100;
        self.error = None;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Mark the item failed with a human-readable message.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.apply(StatusEvent::Fail)?;
        self.error = Some(message.into());
        Ok(())
    }

    /// Discard partial progress ahead of a retry.
    pub fn reset_transfer(&mut self) {
        self.bytes_downloaded = 0;
        self.progress = 0;
        self.error = None;
    }

    /// Bytes this item occupies (or will occupy) in the cache.
    pub fn footprint(&self) -> u64 {
        self.size.unwrap_or(self.bytes_downloaded)
    }

    /// Completed and not pinned.
    pub fn is_evictable(&self) -> bool {
        self.status == DownloadStatus::Completed && !self.pinned
    }

    /// Progress snapshot for listeners.
    pub fn progress_update(&self) -> ProgressUpdate {
        ProgressUpdate {
            id: self.id,
            loaded: self.bytes_downloaded,
            total: self.size,
            percentage: self.progress,
        }
    }
}

/// `round(bytes / size * 100)`, capped at 100; 0 when the size is unknown.
pub fn compute_progress(bytes: u64, size: Option<u64>) -> u8 {
    match size {
        Some(size) if size > 0 => ((bytes as f64 / size as f64) * 100.0).round().min(100.0) as u8,
        _ => 0,
    }
}

/// Per-chunk progress delivered to listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub id: DownloadId,
    pub loaded: u64,
    pub total: Option<u64>,
    pub percentage: u8,
}

// ============================================================================
// Eviction & Quota
// ============================================================================

/// A completed, unpinned item ranked for eviction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvictionCandidate {
    pub id: DownloadId,
    pub content_id: String,
    pub title: String,
    pub url: String,
    pub size: u64,
    /// Last playback, else completion, else admission time
    pub last_accessed: DateTime<Utc>,
    /// Age score in days; higher is staler and evicted first
    pub priority: f64,
}

/// Storage usage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageQuota {
    pub usage: u64,
    pub quota: u64,
    pub percentage: f64,
}

impl StorageQuota {
    pub fn new(usage: u64, quota: u64) -> Self {
        let percentage = if quota == 0 {
            100.0
        } else {
            usage as f64 / quota as f64 * 100.0
        };
        Self {
            usage,
            quota,
            percentage,
        }
    }

    /// Bytes left before the quota is reached.
    pub fn available(&self) -> u64 {
        self.quota.saturating_sub(self.usage)
    }
}
