//! tierfetch - Tiered Image Loader
//!
//! Fetches images through an in-memory cache, an on-disk cache and the
//! network, returning the first hit and back-filling the faster tiers.
//!
//! # Architecture
//!
//! ```text
//! resolve(key)
//!     │
//!     ├─▶ FastTier (LRU, RAM) ───── hit ─▶ return
//!     ├─▶ PersistentTier (disk) ─── hit ─▶ back-fill fast, return
//!     └─▶ OriginFetcher (HTTP) ──── ok ──▶ back-fill fast + disk, return
//! ```
//!
//! Concurrent lookups of one key share a single origin download.
//!
//! # Modules
//!
//! - [`adapters`] - Event publisher adapters
//! - [`cache`] - Tiers, resolver, single-flight and clearer
//! - [`config`] - YAML and default configuration
//! - [`domain`] - Ports and resolution events
//! - [`error`] - Error types
//! - [`server`] - HTTP front-end and Prometheus exposition

pub mod adapters;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod server;

// Re-export commonly used types
pub use cache::{
    CacheClearer, ClearReport, FastTier, HttpOriginFetcher, LookupKey, PersistentTier,
    ResolvedImage, SourceTier, TieredResolver,
};
pub use config::LoaderConfig;
pub use error::{Error, FetchError, Result};
