//! # Eviction Planner
//!
//! Ranks completed downloads by staleness and removes them until a byte
//! target is met.
//!
//! ## Scoring
//!
//! - Accessed items: days since the last playback
//! - Never accessed: days since completion, halved
//!
//! Higher scores are staler and are evicted first. Pinned items and
//! anything not completed are never candidates.

use crate::error::Result;
use crate::models::{DownloadItem, EvictionCandidate};
use crate::repository::{AccessRepository, DownloadRepository};
use bridge_traits::{ByteCache, Clock};
use chrono::{DateTime, Utc};
use core_runtime::logging::redact_url;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Discount applied to items that were never played back.
const UNACCESSED_DIVISOR: f64 = 2.0;

fn days_between(earlier: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - earlier).num_seconds() as f64 / SECONDS_PER_DAY).max(0.0)
}

/// Rank evictable items, stalest first.
///
/// Equal scores fall back to the oldest reference time.
pub fn rank(
    items: &[DownloadItem],
    access: &HashMap<String, DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<EvictionCandidate> {
    let mut candidates: Vec<EvictionCandidate> = items
        .iter()
        .filter(|item| item.is_evictable())
        .map(|item| {
            let (last_accessed, priority) = match access.get(&item.content_id) {
                Some(at) => (*at, days_between(*at, now)),
                None => {
                    let reference = item.completed_at.unwrap_or(item.added_at);
                    (reference, days_between(reference, now) / UNACCESSED_DIVISOR)
                }
            };

            EvictionCandidate {
                id: item.id,
                content_id: item.content_id.clone(),
                title: item.title.clone(),
                url: item.url.clone(),
                size: item.footprint(),
                last_accessed,
                priority,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.priority
            .total_cmp(&a.priority)
            .then(a.last_accessed.cmp(&b.last_accessed))
    });
    candidates
}

/// Removes cached payloads under quota pressure
pub struct EvictionPlanner {
    cache: Arc<dyn ByteCache>,
    downloads: Arc<dyn DownloadRepository>,
    access: Arc<dyn AccessRepository>,
    clock: Arc<dyn Clock>,
}

impl EvictionPlanner {
    pub fn new(
        cache: Arc<dyn ByteCache>,
        downloads: Arc<dyn DownloadRepository>,
        access: Arc<dyn AccessRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache,
            downloads,
            access,
            clock,
        }
    }

    /// Candidates among `items`, stalest first.
    pub async fn get_eviction_candidates(
        &self,
        items: &[DownloadItem],
    ) -> Result<Vec<EvictionCandidate>> {
        let access = self.access.load_all().await?;
        Ok(rank(items, &access, self.clock.now()))
    }

    /// Evict candidates until at least `target_bytes` are freed.
    ///
    /// Stops at the first candidate that crosses the target. Each record is
    /// deleted before its payload, and `on_evicted` runs as soon as the
    /// record is gone, so a failure part way through still reports every
    /// item already removed. Returns the evicted candidates in eviction order.
    #[instrument(skip(self, items, on_evicted), fields(items = items.len()))]
    pub async fn evict<F>(
        &self,
        target_bytes: u64,
        items: &[DownloadItem],
        mut on_evicted: F,
    ) -> Result<Vec<EvictionCandidate>>
    where
        F: FnMut(&EvictionCandidate) + Send,
    {
        if target_bytes == 0 {
            return Ok(Vec::new());
        }

        let candidates = self.get_eviction_candidates(items).await?;
        let mut freed = 0u64;
        let mut evicted = Vec::new();

        for candidate in candidates {
            self.downloads.delete(&candidate.id).await?;
            on_evicted(&candidate);
            self.cache.delete(&candidate.url).await?;

            freed += candidate.size;
            debug!(
                id = %candidate.id,
                url = %redact_url(&candidate.url),
                priority = candidate.priority,
                size = candidate.size,
                "Evicted download"
            );
            evicted.push(candidate);

            if freed >= target_bytes {
                break;
            }
        }

        info!(freed, target_bytes, count = evicted.len(), "Eviction finished");
        Ok(evicted)
    }

    /// Record a playback of `content_id` now.
    pub async fn update_last_accessed(&self, content_id: &str) -> Result<()> {
        self.access.touch(content_id, self.clock.now()).await
    }

    /// Drop every access record.
    pub async fn clear_access(&self) -> Result<()> {
        self.access.clear().await
    }
}
