//! Workspace umbrella crate.
//!
//! Exposes feature flags that map onto the workspace crates so host
//! applications can depend on `offline-media-workspace` and get the offline
//! download core without wiring `core-service` themselves.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
