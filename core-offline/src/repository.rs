//! # Download Record Repositories
//!
//! Persist download items and last-access timestamps through the host
//! [`RecordStore`].
//!
//! ## Overview
//!
//! - `downloads` table: one JSON record per item, keyed by download id
//! - `media-access` table: one RFC 3339 timestamp per content id
//!
//! Every write is a single-key upsert or delete.

use crate::error::{OfflineError, Result};
use crate::models::{DownloadId, DownloadItem};
use async_trait::async_trait;
use bridge_traits::{RecordStore, RecordTable};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

// ============================================================================
// Repository Traits
// ============================================================================

/// Repository trait for download item persistence
#[async_trait]
pub trait DownloadRepository: Send + Sync {
    /// Load every persisted item.
    ///
    /// Undecodable records are skipped with a warning so one corrupt row
    /// cannot block startup.
    async fn load_all(&self) -> Result<Vec<DownloadItem>>;

    /// Insert or replace a single item.
    ///
    /// # Errors
    ///
    /// Returns an error if the record store write fails
    async fn save(&self, item: &DownloadItem) -> Result<()>;

    /// Delete a single item. Missing items are not an error.
    async fn delete(&self, id: &DownloadId) -> Result<()>;

    /// Remove every item.
    async fn clear(&self) -> Result<()>;
}

/// Repository trait for playback access timestamps
#[async_trait]
pub trait AccessRepository: Send + Sync {
    /// Load every content id's last access time.
    async fn load_all(&self) -> Result<HashMap<String, DateTime<Utc>>>;

    /// Record an access at `at`.
    async fn touch(&self, content_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Remove every access record.
    async fn clear(&self) -> Result<()>;
}

// ============================================================================
// RecordStore Implementations
// ============================================================================

/// [`DownloadRepository`] backed by the `downloads` table
pub struct StoreDownloadRepository {
    store: Arc<dyn RecordStore>,
}

impl StoreDownloadRepository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DownloadRepository for StoreDownloadRepository {
    async fn load_all(&self) -> Result<Vec<DownloadItem>> {
        let rows = self.store.get_all(RecordTable::Downloads).await?;
        let mut items = Vec::with_capacity(rows.len());

        for (key, value) in rows {
            match serde_json::from_value::<DownloadItem>(value) {
                Ok(item) => items.push(item),
                Err(e) => {
                    let err = OfflineError::CorruptRecord {
                        key,
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "Skipping download record");
                }
            }
        }

        Ok(items)
    }

    async fn save(&self, item: &DownloadItem) -> Result<()> {
        let value = serde_json::to_value(item).map_err(bridge_traits::BridgeError::from)?;
        self.store
            .put(RecordTable::Downloads, &item.id.to_string(), value)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &DownloadId) -> Result<()> {
        self.store
            .delete(RecordTable::Downloads, &id.to_string())
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.store.clear(RecordTable::Downloads).await?;
        Ok(())
    }
}

/// [`AccessRepository`] backed by the `media-access` table
pub struct StoreAccessRepository {
    store: Arc<dyn RecordStore>,
}

impl StoreAccessRepository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AccessRepository for StoreAccessRepository {
    async fn load_all(&self) -> Result<HashMap<String, DateTime<Utc>>> {
        let rows = self.store.get_all(RecordTable::MediaAccess).await?;

        Ok(rows
            .into_iter()
            .filter_map(|(content_id, value)| {
                match serde_json::from_value::<DateTime<Utc>>(value) {
                    Ok(at) => Some((content_id, at)),
                    Err(e) => {
                        warn!(content_id = %content_id, error = %e, "Skipping access record");
                        None
                    }
                }
            })
            .collect())
    }

    async fn touch(&self, content_id: &str, at: DateTime<Utc>) -> Result<()> {
        let value = serde_json::to_value(at).map_err(bridge_traits::BridgeError::from)?;
        self.store
            .put(RecordTable::MediaAccess, content_id, value)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.store.clear(RecordTable::MediaAccess).await?;
        Ok(())
    }
}
