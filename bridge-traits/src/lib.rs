//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the offline media core and
//! platform-specific implementations. Each trait represents a capability the
//! core requires but that must be implemented differently per platform.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Streaming GET with byte-range resume
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O backing the payload cache
//!
//! ### Storage
//! - [`RecordStore`](storage::RecordStore) - Durable `downloads` / `media-access` tables
//! - [`ByteCache`](storage::ByteCache) - Content-addressable payload cache keyed by source URL
//! - [`StorageEstimator`](storage::StorageEstimator) - Platform usage/quota estimate
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | iOS      | TBD                 | 📋 Planned |
//! | Android  | TBD                 | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should:
//!
//! - Convert platform-specific errors to `BridgeError`
//! - Provide actionable error messages
//! - Include error context (e.g., file paths, table names)
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so that a single adapter can
//! be shared by every concurrent transfer task.
//!
//! ## Examples
//!
//! ### Implementing RecordStore
//!
//! ```ignore
//! use bridge_traits::storage::{RecordStore, RecordTable};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyRecordStore { /* ... */ }
//!
//! #[async_trait]
//! impl RecordStore for MyRecordStore {
//!     async fn put(&self, table: RecordTable, key: &str, value: serde_json::Value) -> Result<()> {
//!         // Upsert a single row
//!         todo!()
//!     }
//!     // ...
//! }
//! ```

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{ByteStream, HttpClient, HttpMethod, HttpRequest, HttpStream};
pub use storage::{
    ByteCache, DeviceClass, FileMetadata, FileSystemAccess, RecordStore, RecordTable,
    StorageEstimate, StorageEstimator,
};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
