//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the offline media core:
//! - Logging and tracing infrastructure
//! - Configuration management with platform defaults
//! - Event bus for download and cache events
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the download orchestrator
//! and the service facade depend on. It establishes the logging conventions,
//! bridge wiring and event broadcasting used throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
