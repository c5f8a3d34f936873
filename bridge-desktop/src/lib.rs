//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides production-ready implementations of the bridge traits
//! the offline media core needs:
//! - `HttpClient` using `reqwest` byte streams
//! - `FileSystemAccess` using `tokio::fs`
//! - `RecordStore` using a SQLite-backed key-value table
//! - `StorageEstimator` using cache directory size plus free disk space
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{default_database_path, ReqwestHttpClient, SqliteRecordStore};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let records = SqliteRecordStore::new(default_database_path()).await?;
//!
//!     // Use in core configuration
//!     Ok(())
//! }
//! ```

mod estimator;
mod filesystem;
mod http;
mod paths;
mod records;

pub use estimator::DesktopStorageEstimator;
pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use paths::{default_cache_dir, default_database_path};
pub use records::SqliteRecordStore;
