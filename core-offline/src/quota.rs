//! Storage quota estimation and admission reservations

use crate::config::OfflineConfig;
use crate::models::{DownloadId, StorageQuota};
use bridge_traits::{DeviceClass, StorageEstimate, StorageEstimator};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Combines the platform estimate with device-class defaults
pub struct QuotaEstimator {
    estimator: Option<Arc<dyn StorageEstimator>>,
    config: OfflineConfig,
}

impl QuotaEstimator {
    pub fn new(estimator: Option<Arc<dyn StorageEstimator>>, config: OfflineConfig) -> Self {
        Self { estimator, config }
    }

    /// Device class used for the default quota.
    pub fn device_class(&self) -> DeviceClass {
        self.config
            .device_class
            .or_else(|| self.estimator.as_ref().map(|e| e.device_class()))
            .unwrap_or(DeviceClass::Desktop)
    }

    /// Current usage and quota.
    ///
    /// `tracked_usage` stands in for usage when the platform cannot measure
    /// it. Estimator failures fall back to defaults.
    pub async fn get_quota(&self, tracked_usage: u64) -> StorageQuota {
        let estimate = match &self.estimator {
            Some(estimator) => match estimator.estimate().await {
                Ok(estimate) => estimate,
                Err(e) => {
                    warn!(error = %e, "Storage estimate failed, using defaults");
                    None
                }
            },
            None => None,
        }
        .unwrap_or_default();

        self.resolve(estimate, tracked_usage)
    }

    fn resolve(&self, estimate: StorageEstimate, tracked_usage: u64) -> StorageQuota {
        let quota = estimate
            .quota
            .filter(|q| *q > 0)
            .unwrap_or_else(|| self.config.default_quota(self.device_class()));
        let usage = estimate.usage.unwrap_or(tracked_usage);

        debug!(usage, quota, "Resolved storage quota");
        StorageQuota::new(usage, quota)
    }

    /// `usage + size <= quota`.
    pub async fn has_space(&self, size: u64, tracked_usage: u64) -> bool {
        let quota = self.get_quota(tracked_usage).await;
        quota.usage.saturating_add(size) <= quota.quota
    }

    /// Usage at or above the eviction threshold.
    pub async fn needs_eviction(&self, tracked_usage: u64) -> bool {
        self.exceeds_threshold(&self.get_quota(tracked_usage).await)
    }

    pub fn exceeds_threshold(&self, quota: &StorageQuota) -> bool {
        quota.percentage >= f64::from(self.config.eviction_threshold_percent)
    }

    /// Bytes to free so usage falls to the configured target percentage.
    pub fn bytes_above_target(&self, quota: &StorageQuota) -> u64 {
        let target =
            (quota.quota as f64 * f64::from(self.config.eviction_target_percent) / 100.0) as u64;
        quota.usage.saturating_sub(target)
    }
}

#[derive(Debug, Clone, Copy)]
struct Reservation {
    bytes: u64,
    /// Bytes already staged when the reservation was taken
    offset: u64,
}

/// Bytes promised to transfers admitted but not yet settled
///
/// Staged bytes show up in measured usage as they land, so a reservation
/// only counts for the part its transfer has not written yet.
#[derive(Debug, Default)]
pub struct QuotaLedger {
    reservations: HashMap<DownloadId, Reservation>,
}

impl QuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `bytes` for `id` at staged `offset`, replacing any earlier
    /// reservation.
    pub fn reserve(&mut self, id: DownloadId, bytes: u64, offset: u64) {
        self.reservations.insert(id, Reservation { bytes, offset });
    }

    /// Release the reservation of `id`, returning its size.
    pub fn release(&mut self, id: &DownloadId) -> u64 {
        self.reservations.remove(id).map_or(0, |r| r.bytes)
    }

    /// Total bytes reserved at admission.
    pub fn reserved(&self) -> u64 {
        self.reservations.values().map(|r| r.bytes).sum()
    }

    /// Reserved bytes not yet staged, given each transfer's current byte
    /// count.
    pub fn outstanding<F>(&self, staged: F) -> u64
    where
        F: Fn(&DownloadId) -> u64,
    {
        self.reservations
            .iter()
            .map(|(id, r)| {
                let landed = staged(id).saturating_sub(r.offset);
                r.bytes.saturating_sub(landed)
            })
            .sum()
    }

    pub fn clear(&mut self) {
        self.reservations.clear();
    }
}
