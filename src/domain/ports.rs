//! Domain Ports (Port/Adapter Pattern)
//!
//! The abstractions the resolver depends on. Tiers, the origin and event
//! sinks are injected as trait objects so that each can be replaced by a
//! stub in tests or by a different backend in production.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      TieredResolver                       │
//! │   ┌──────────┐     ┌──────────┐     ┌───────────────┐    │
//! │   │   Tier   │     │   Tier   │     │ OriginFetcher │    │
//! │   │  (fast)  │ ──▶ │ (persist)│ ──▶ │   (network)   │    │
//! │   └──────────┘     └──────────┘     └───────────────┘    │
//! └──────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use super::events::ResolutionEvent;
use crate::cache::{LookupKey, SourceTier};
use crate::error::{FetchError, Result};

/// A cache tier: a key → payload store that can report presence.
///
/// A miss is `Ok(None)`, never an error. Errors mean the tier itself failed.
#[async_trait]
pub trait Tier: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Source reported for payloads found in this tier
    fn source(&self) -> SourceTier;

    /// Whether any payload is stored under `key`
    async fn contains(&self, key: &LookupKey) -> Result<bool>;

    /// Get the payload stored under `key`
    async fn get(&self, key: &LookupKey) -> Result<Option<Bytes>>;

    /// Store `payload` under `key`, replacing any previous value
    async fn put(&self, key: &LookupKey, payload: Bytes) -> Result<()>;

    /// Delete everything; returns the number of entries removed
    async fn clear(&self) -> Result<u64>;
}

/// Retrieves payloads from the network. Not a tier: it never "contains".
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    /// Download the payload addressed by `key`
    async fn fetch(&self, key: &LookupKey) -> std::result::Result<Bytes, FetchError>;
}

/// Sink for resolution events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a single event.
    async fn publish(&self, event: ResolutionEvent) -> Result<()>;

    /// Publish multiple events.
    async fn publish_all(&self, events: Vec<ResolutionEvent>) -> Result<()>;
}
