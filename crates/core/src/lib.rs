//! Core types and shared functionality for superfetch.
//!
//! This crate provides:
//! - The in-memory content cache and its key-derivation scheme
//! - Unified error types
//! - Layered application configuration
//! - Data model types shared across the fetch/transform/tool boundary

pub mod cache;
pub mod config;
pub mod error;
pub mod model;

pub use cache::{CacheEntry, CacheEntryMeta, CacheUpdateEvent, ContentCache};
pub use config::{AppConfig, ConfigError};
pub use error::{Error, FetchErrorCode};
pub use model::{ContentBlock, FetchTelemetryContext, PipelineResult, redact_url};
