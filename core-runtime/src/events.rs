//! # Event Bus System
//!
//! Provides an event-driven architecture for the offline media core using
//! `tokio::sync::broadcast`. Download lifecycle changes and cache maintenance
//! outcomes are published as typed events so that UI layers can react without
//! polling.
//!
//! ```text
//! DownloadManager ──emit──┐
//!                         ├──> EventBus ──subscribe──> UI / host bindings
//! maintenance pass ─emit──┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Download(DownloadEvent::Resumed {
//!         download_id: "dl-1".to_string(),
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "Download resumed");
//! # }
//! ```
//!
//! A subscriber that falls more than the buffer size behind gets
//! `RecvError::Lagged(n)` and keeps receiving from the newest events.
//!
//! Per-chunk progress is not published here; it flows through the per-item
//! progress channel of the download manager.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Download lifecycle events
    Download(DownloadEvent),
    /// Cache and quota maintenance events
    Cache(CacheEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Download(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Download(DownloadEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Cache(CacheEvent::QuotaPressure { .. }) => EventSeverity::Warning,
            CoreEvent::Download(DownloadEvent::Completed { .. })
            | CoreEvent::Cache(CacheEvent::Evicted { .. })
            | CoreEvent::Cache(CacheEvent::Cleared { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Download Events
// ============================================================================

/// Events emitted as download items move through their lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    /// Item accepted and waiting for a transfer slot.
    Queued {
        download_id: String,
        content_id: String,
        title: String,
    },
    /// Transfer slot granted.
    Started {
        download_id: String,
        /// Byte offset the transfer resumes from (0 for a fresh transfer).
        resume_from: u64,
    },
    /// Transfer cancelled with partial bytes retained.
    Paused {
        download_id: String,
        bytes_downloaded: u64,
    },
    /// Paused item re-queued.
    Resumed { download_id: String },
    /// Payload committed to the cache.
    Completed {
        download_id: String,
        content_id: String,
        bytes: u64,
    },
    /// Transfer or admission failed.
    Failed {
        download_id: String,
        message: String,
    },
    /// Item and its cached bytes deleted.
    Removed { download_id: String },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::Queued { .. } => "Download queued",
            DownloadEvent::Started { .. } => "Download started",
            DownloadEvent::Paused { .. } => "Download paused",
            DownloadEvent::Resumed { .. } => "Download resumed",
            DownloadEvent::Completed { .. } => "Download completed",
            DownloadEvent::Failed { .. } => "Download failed",
            DownloadEvent::Removed { .. } => "Download removed",
        }
    }

    /// Identifier of the item this event concerns.
    pub fn download_id(&self) -> &str {
        match self {
            DownloadEvent::Queued { download_id, .. }
            | DownloadEvent::Started { download_id, .. }
            | DownloadEvent::Paused { download_id, .. }
            | DownloadEvent::Resumed { download_id }
            | DownloadEvent::Completed { download_id, .. }
            | DownloadEvent::Failed { download_id, .. }
            | DownloadEvent::Removed { download_id } => download_id,
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

/// Events emitted by quota checks and eviction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// A completed item was evicted to free space.
    Evicted {
        download_id: String,
        content_id: String,
        bytes_freed: u64,
    },
    /// Usage crossed the eviction threshold.
    QuotaPressure {
        usage: u64,
        quota: u64,
        /// Whole-number usage percentage.
        percent: u8,
    },
    /// Every download and cached payload was removed.
    Cleared { items_removed: usize },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Evicted { .. } => "Cached item evicted",
            CacheEvent::QuotaPressure { .. } => "Storage quota under pressure",
            CacheEvent::Cleared { .. } => "Offline cache cleared",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast channel shared by every publisher in the core.
///
/// Cloning shares the channel. Emitting never blocks.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` events are buffered per subscriber before it lags.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Number of receivers reached; errors when nobody is subscribed.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Receiver for events emitted from now on.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver that skips events rejected by an optional predicate.
///
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let cache_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Cache(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Next accepted event. Lag and closure surface as [`RecvError`].
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// `None` when nothing accepted is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
