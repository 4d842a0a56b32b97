//! Resolution Events
//!
//! Immutable records of what happened while resolving a key. Used for audit
//! logging and by tests to observe detached back-fill work.
//!
//! # Example
//!
//! ```ignore
//! let event = ResolutionEvent::tier_checked("https://example.com/a.png", SourceTier::Fast, false);
//! event_publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::SourceTier;

/// Event emitted by the resolver and the cache clearer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResolutionEvent {
    /// A cache tier was consulted.
    TierChecked {
        key: String,
        tier: SourceTier,
        hit: bool,
        timestamp: DateTime<Utc>,
    },

    /// A cache tier failed and was treated as a miss.
    TierFailed {
        key: String,
        tier: SourceTier,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A download from the origin was started.
    OriginFetchStarted {
        key: String,
        timestamp: DateTime<Utc>,
    },

    /// A download from the origin failed.
    OriginFetchFailed {
        key: String,
        kind: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A key was resolved.
    Resolved {
        key: String,
        source: SourceTier,
        size_bytes: u64,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A faster tier was back-filled.
    BackfillCompleted {
        key: String,
        tier: SourceTier,
        size_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// Back-filling a faster tier failed.
    BackfillFailed {
        key: String,
        tier: SourceTier,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// All cache tiers were purged.
    CacheCleared {
        persistent_removed: u64,
        fast_removed: u64,
        timestamp: DateTime<Utc>,
    },
}

impl ResolutionEvent {
    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            ResolutionEvent::TierChecked { .. } => "TierChecked",
            ResolutionEvent::TierFailed { .. } => "TierFailed",
            ResolutionEvent::OriginFetchStarted { .. } => "OriginFetchStarted",
            ResolutionEvent::OriginFetchFailed { .. } => "OriginFetchFailed",
            ResolutionEvent::Resolved { .. } => "Resolved",
            ResolutionEvent::BackfillCompleted { .. } => "BackfillCompleted",
            ResolutionEvent::BackfillFailed { .. } => "BackfillFailed",
            ResolutionEvent::CacheCleared { .. } => "CacheCleared",
        }
    }

    /// Key the event relates to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            ResolutionEvent::TierChecked { key, .. }
            | ResolutionEvent::TierFailed { key, .. }
            | ResolutionEvent::OriginFetchStarted { key, .. }
            | ResolutionEvent::OriginFetchFailed { key, .. }
            | ResolutionEvent::Resolved { key, .. }
            | ResolutionEvent::BackfillCompleted { key, .. }
            | ResolutionEvent::BackfillFailed { key, .. } => Some(key),
            ResolutionEvent::CacheCleared { .. } => None,
        }
    }

    /// Get the event timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ResolutionEvent::TierChecked { timestamp, .. }
            | ResolutionEvent::TierFailed { timestamp, .. }
            | ResolutionEvent::OriginFetchStarted { timestamp, .. }
            | ResolutionEvent::OriginFetchFailed { timestamp, .. }
            | ResolutionEvent::Resolved { timestamp, .. }
            | ResolutionEvent::BackfillCompleted { timestamp, .. }
            | ResolutionEvent::BackfillFailed { timestamp, .. }
            | ResolutionEvent::CacheCleared { timestamp, .. } => *timestamp,
        }
    }

    pub fn tier_checked(key: &str, tier: SourceTier, hit: bool) -> Self {
        ResolutionEvent::TierChecked {
            key: key.to_string(),
            tier,
            hit,
            timestamp: Utc::now(),
        }
    }

    pub fn tier_failed(key: &str, tier: SourceTier, error: impl ToString) -> Self {
        ResolutionEvent::TierFailed {
            key: key.to_string(),
            tier,
            error: error.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn origin_fetch_started(key: &str) -> Self {
        ResolutionEvent::OriginFetchStarted {
            key: key.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn origin_fetch_failed(key: &str, kind: &str, error: impl ToString) -> Self {
        ResolutionEvent::OriginFetchFailed {
            key: key.to_string(),
            kind: kind.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn resolved(key: &str, source: SourceTier, size_bytes: u64, latency: Duration) -> Self {
        ResolutionEvent::Resolved {
            key: key.to_string(),
            source,
            size_bytes,
            latency_ms: latency.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    pub fn backfill_completed(key: &str, tier: SourceTier, size_bytes: u64) -> Self {
        ResolutionEvent::BackfillCompleted {
            key: key.to_string(),
            tier,
            size_bytes,
            timestamp: Utc::now(),
        }
    }

    pub fn backfill_failed(key: &str, tier: SourceTier, error: impl ToString) -> Self {
        ResolutionEvent::BackfillFailed {
            key: key.to_string(),
            tier,
            error: error.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn cache_cleared(persistent_removed: u64, fast_removed: u64) -> Self {
        ResolutionEvent::CacheCleared {
            persistent_removed,
            fast_removed,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_and_key() {
        let event = ResolutionEvent::tier_checked("k", SourceTier::Fast, true);
        assert_eq!(event.event_type(), "TierChecked");
        assert_eq!(event.key(), Some("k"));

        let cleared = ResolutionEvent::cache_cleared(3, 4);
        assert_eq!(cleared.event_type(), "CacheCleared");
        assert_eq!(cleared.key(), None);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = ResolutionEvent::resolved("k", SourceTier::Origin, 10, Duration::from_millis(42));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Resolved");
        assert_eq!(json["source"], "origin");
        assert_eq!(json["latency_ms"], 42);

        let back: ResolutionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_type(), "Resolved");
    }

    #[test]
    fn test_event_timestamp_is_recent() {
        let event = ResolutionEvent::origin_fetch_started("k");
        let age = Utc::now() - event.timestamp();
        assert!(age.num_seconds() < 5);
    }
}
