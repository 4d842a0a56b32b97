//! Cache Clearer
//!
//! Administrative purge of every cache tier. The persistent tier is cleared
//! before the fast tier. A resolution already in flight may repopulate a key
//! right after a purge.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::domain::events::ResolutionEvent;
use crate::domain::ports::{EventPublisher, Tier};

/// Outcome of [`CacheClearer::clear_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    /// Files deleted from the persistent tier
    pub persistent_removed: u64,
    /// Entries dropped from the fast tier
    pub fast_removed: u64,
    /// One message per tier that failed to clear
    pub errors: Vec<String>,
}

impl ClearReport {
    /// Whether every tier cleared without error
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Clears the persistent tier, then the fast tier
#[derive(Clone)]
pub struct CacheClearer {
    persistent: Arc<dyn Tier>,
    fast: Arc<dyn Tier>,
    events: Option<Arc<dyn EventPublisher>>,
}

impl CacheClearer {
    pub fn new(persistent: Arc<dyn Tier>, fast: Arc<dyn Tier>) -> Self {
        Self {
            persistent,
            fast,
            events: None,
        }
    }

    /// Publish a `CacheCleared` event after each purge
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Purge every tier. Idempotent; failures are reported, not returned.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> ClearReport {
        let mut report = ClearReport::default();

        match self.persistent.clear().await {
            Ok(removed) => report.persistent_removed = removed,
            Err(e) => {
                warn!(tier = self.persistent.name(), error = %e, "Failed to clear cache tier");
                report
                    .errors
                    .push(format!("{}: {}", self.persistent.name(), e));
            }
        }

        match self.fast.clear().await {
            Ok(removed) => report.fast_removed = removed,
            Err(e) => {
                warn!(tier = self.fast.name(), error = %e, "Failed to clear cache tier");
                report.errors.push(format!("{}: {}", self.fast.name(), e));
            }
        }

        info!(
            persistent_removed = report.persistent_removed,
            fast_removed = report.fast_removed,
            errors = report.errors.len(),
            "Cache cleared"
        );

        if let Some(events) = &self.events {
            let event =
                ResolutionEvent::cache_cleared(report.persistent_removed, report.fast_removed);
            if let Err(e) = events.publish(event).await {
                warn!(error = %e, "Failed to publish cache cleared event");
            }
        }

        report
    }
}

impl std::fmt::Debug for CacheClearer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClearer")
            .field("persistent", &self.persistent.name())
            .field("fast", &self.fast.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryEventCollector;
    use crate::cache::entry::{LookupKey, SourceTier};
    use crate::cache::fast::FastTier;
    use crate::cache::memory::InMemoryTier;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;

    /// Records the order tiers were cleared in
    struct OrderedTier {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl Tier for OrderedTier {
        fn name(&self) -> &str {
            self.label
        }
        fn source(&self) -> SourceTier {
            SourceTier::Persistent
        }
        async fn contains(&self, _key: &LookupKey) -> Result<bool> {
            Ok(false)
        }
        async fn get(&self, _key: &LookupKey) -> Result<Option<Bytes>> {
            Ok(None)
        }
        async fn put(&self, _key: &LookupKey, _payload: Bytes) -> Result<()> {
            Ok(())
        }
        async fn clear(&self) -> Result<u64> {
            self.log.lock().push(self.label);
            if self.fail {
                Err(Error::Internal("disk unplugged".to_string()))
            } else {
                Ok(1)
            }
        }
    }

    #[tokio::test]
    async fn test_clear_on_empty_tiers() {
        let clearer = CacheClearer::new(
            Arc::new(InMemoryTier::default()),
            Arc::new(FastTier::with_capacity(1024)),
        );
        let report = clearer.clear_all().await;
        assert!(report.is_clean());
        assert_eq!(report, ClearReport::default());

        // Idempotent
        assert_eq!(clearer.clear_all().await, ClearReport::default());
    }

    #[tokio::test]
    async fn test_clear_counts_and_events() {
        let persistent = Arc::new(InMemoryTier::default());
        let fast = Arc::new(FastTier::with_capacity(1024));
        let key = LookupKey::new("k").unwrap();
        persistent.put(&key, Bytes::from_static(b"a")).await.unwrap();
        fast.put("k", Bytes::from_static(b"a"));
        fast.put("j", Bytes::from_static(b"b"));

        let collector = Arc::new(InMemoryEventCollector::new());
        let clearer =
            CacheClearer::new(persistent.clone(), fast.clone()).with_events(collector.clone());

        let report = clearer.clear_all().await;
        assert_eq!(report.persistent_removed, 1);
        assert_eq!(report.fast_removed, 2);
        assert!(persistent.is_empty());
        assert!(fast.is_empty());
        assert_eq!(collector.events_of_type("CacheCleared").len(), 1);
    }

    #[tokio::test]
    async fn test_persistent_cleared_first_and_failures_reported() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let clearer = CacheClearer::new(
            Arc::new(OrderedTier {
                label: "disk",
                log: log.clone(),
                fail: true,
            }),
            Arc::new(OrderedTier {
                label: "memory",
                log: log.clone(),
                fail: false,
            }),
        );

        let report = clearer.clear_all().await;
        assert_eq!(*log.lock(), vec!["disk", "memory"]);
        assert!(!report.is_clean());
        assert_eq!(report.fast_removed, 1);
        assert!(report.errors[0].contains("disk unplugged"));
    }
}
