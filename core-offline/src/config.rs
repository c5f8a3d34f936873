//! Offline download and eviction configuration

use bridge_traits::DeviceClass;
use std::time::Duration;

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Configuration for the offline download manager and eviction planner.
#[derive(Debug, Clone)]
pub struct OfflineConfig {
    /// Maximum number of simultaneous transfers (default: 2)
    pub max_concurrent: usize,

    /// Usage percentage at which eviction is required (default: 90)
    pub eviction_threshold_percent: u8,

    /// Usage percentage maintenance evicts down to (default: 80)
    pub eviction_target_percent: u8,

    /// Bytes reserved at admission when the size is not yet known (default: 256MB)
    pub unknown_size_reservation: u64,

    /// Evict stale entries before refusing admission (default: true)
    pub evict_on_admission: bool,

    /// Re-queue transfers interrupted by a restart (default: true)
    pub resume_interrupted_on_start: bool,

    /// Fail a transfer when no chunk arrives within this window (default: off)
    pub stall_timeout: Option<Duration>,

    /// Period of the background maintenance task (default: off)
    pub maintenance_interval: Option<Duration>,

    /// Override the device class reported by the storage estimator
    pub device_class: Option<DeviceClass>,

    /// Quota assumed on mobile devices without a platform estimate (default: 10GB)
    pub mobile_default_quota: u64,

    /// Quota assumed on desktop devices without a platform estimate (default: 50GB)
    pub desktop_default_quota: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            eviction_threshold_percent: 90,
            eviction_target_percent: 80,
            unknown_size_reservation: 256 * MIB,
            evict_on_admission: true,
            resume_interrupted_on_start: true,
            stall_timeout: None,
            maintenance_interval: None,
            device_class: None,
            mobile_default_quota: 10 * GIB,
            desktop_default_quota: 50 * GIB,
        }
    }
}

impl OfflineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum concurrent transfers.
    pub fn with_max_concurrent(mut self, count: usize) -> Self {
        self.max_concurrent = count;
        self
    }

    /// Set the usage percentage that triggers eviction.
    pub fn with_eviction_threshold(mut self, percent: u8) -> Self {
        self.eviction_threshold_percent = percent;
        self
    }

    /// Set the usage percentage maintenance evicts down to.
    pub fn with_eviction_target(mut self, percent: u8) -> Self {
        self.eviction_target_percent = percent;
        self
    }

    pub fn with_unknown_size_reservation(mut self, bytes: u64) -> Self {
        self.unknown_size_reservation = bytes;
        self
    }

    pub fn with_evict_on_admission(mut self, enabled: bool) -> Self {
        self.evict_on_admission = enabled;
        self
    }

    pub fn with_resume_interrupted_on_start(mut self, enabled: bool) -> Self {
        self.resume_interrupted_on_start = enabled;
        self
    }

    /// Enable the per-chunk stall timeout.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = Some(timeout);
        self
    }

    /// Enable periodic maintenance.
    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = Some(interval);
        self
    }

    pub fn with_device_class(mut self, class: DeviceClass) -> Self {
        self.device_class = Some(class);
        self
    }

    /// Default quota for a device class.
    pub fn default_quota(&self, class: DeviceClass) -> u64 {
        match class {
            DeviceClass::Mobile => self.mobile_default_quota,
            DeviceClass::Desktop => self.desktop_default_quota,
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be at least 1".to_string());
        }

        if self.eviction_threshold_percent == 0 || self.eviction_threshold_percent > 100 {
            return Err("eviction_threshold_percent must be between 1 and 100".to_string());
        }

        if self.eviction_target_percent >= self.eviction_threshold_percent {
            return Err(
                "eviction_target_percent must be below eviction_threshold_percent".to_string(),
            );
        }

        if self.mobile_default_quota == 0 || self.desktop_default_quota == 0 {
            return Err("default quotas must be greater than 0".to_string());
        }

        if matches!(self.stall_timeout, Some(t) if t.is_zero()) {
            return Err("stall_timeout must be non-zero when set".to_string());
        }

        if matches!(self.maintenance_interval, Some(t) if t.is_zero()) {
            return Err("maintenance_interval must be non-zero when set".to_string());
        }

        Ok(())
    }
}
