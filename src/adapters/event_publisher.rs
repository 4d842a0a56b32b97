//! Event Publisher Adapter
//!
//! Implements the `EventPublisher` port with various backends.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::domain::events::ResolutionEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Logging-based event publisher.
///
/// Publishes resolution events to the tracing/logging system.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher {
    /// Whether to log events at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingEventPublisher {
    /// Create a new logging event publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a publisher that logs at info level.
    pub fn info_level() -> Self {
        Self { info_level: true }
    }

    /// Create a publisher that logs at debug level.
    pub fn debug_level() -> Self {
        Self { info_level: false }
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: ResolutionEvent) -> Result<()> {
        let event_type = event.event_type();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));

        if self.info_level {
            info!(event_type = %event_type, event = %json, "Resolution event");
        } else {
            debug!(event_type = %event_type, event = %json, "Resolution event");
        }

        Ok(())
    }

    async fn publish_all(&self, events: Vec<ResolutionEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

/// In-memory event collector for testing.
///
/// Collects events for later inspection and lets a test wait until an
/// expected event shows up.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: parking_lot::RwLock<Vec<ResolutionEvent>>,
    notify: Notify,
}

impl InMemoryEventCollector {
    /// Create a new in-memory event collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events.
    pub fn events(&self) -> Vec<ResolutionEvent> {
        self.events.read().clone()
    }

    /// Get the count of collected events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Check if there are no events.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clear all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Get events of a specific type.
    pub fn events_of_type(&self, event_type: &str) -> Vec<ResolutionEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Wait until `predicate` matches a collected event, or `timeout` passes.
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> Option<ResolutionEvent>
    where
        F: Fn(&ResolutionEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(found) = self.events.read().iter().find(|e| predicate(e)).cloned() {
                return Some(found);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: ResolutionEvent) -> Result<()> {
        self.events.write().push(event);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn publish_all(&self, events: Vec<ResolutionEvent>) -> Result<()> {
        self.events.write().extend(events);
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Composite event publisher that publishes to multiple backends.
#[derive(Default)]
pub struct CompositeEventPublisher {
    publishers: Vec<Box<dyn EventPublisher>>,
}

impl CompositeEventPublisher {
    /// Create a new composite publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a publisher to the composite.
    pub fn with_publisher<P: EventPublisher + 'static>(mut self, publisher: P) -> Self {
        self.publishers.push(Box::new(publisher));
        self
    }

    /// Number of wrapped publishers
    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    /// Check if no publishers are wrapped
    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

impl std::fmt::Debug for CompositeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeEventPublisher")
            .field("publisher_count", &self.publishers.len())
            .finish()
    }
}

#[async_trait]
impl EventPublisher for CompositeEventPublisher {
    async fn publish(&self, event: ResolutionEvent) -> Result<()> {
        for publisher in &self.publishers {
            publisher.publish(event.clone()).await?;
        }
        Ok(())
    }

    async fn publish_all(&self, events: Vec<ResolutionEvent>) -> Result<()> {
        for publisher in &self.publishers {
            publisher.publish_all(events.clone()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<P: EventPublisher + ?Sized> EventPublisher for std::sync::Arc<P> {
    async fn publish(&self, event: ResolutionEvent) -> Result<()> {
        (**self).publish(event).await
    }

    async fn publish_all(&self, events: Vec<ResolutionEvent>) -> Result<()> {
        (**self).publish_all(events).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SourceTier;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_logging_publisher() {
        let publisher = LoggingEventPublisher::new();
        let event = ResolutionEvent::tier_checked("k", SourceTier::Fast, false);

        // Should not panic
        publisher.publish(event).await.unwrap();
    }

    #[tokio::test]
    async fn test_in_memory_collector() {
        let collector = InMemoryEventCollector::new();

        assert!(collector.is_empty());

        collector
            .publish(ResolutionEvent::origin_fetch_started("a"))
            .await
            .unwrap();
        collector
            .publish(ResolutionEvent::origin_fetch_started("b"))
            .await
            .unwrap();

        assert_eq!(collector.len(), 2);
        assert_eq!(collector.events_of_type("OriginFetchStarted").len(), 2);

        collector.clear();
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn test_collector_wait_for() {
        let collector = Arc::new(InMemoryEventCollector::new());

        let publisher = collector.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher
                .publish(ResolutionEvent::backfill_completed("k", SourceTier::Persistent, 3))
                .await
                .unwrap();
        });

        let found = collector
            .wait_for(Duration::from_secs(2), |e| e.event_type() == "BackfillCompleted")
            .await;
        assert!(found.is_some());

        let missing = collector
            .wait_for(Duration::from_millis(20), |e| e.event_type() == "CacheCleared")
            .await;
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_composite_publisher() {
        let collector = Arc::new(InMemoryEventCollector::new());
        let composite = CompositeEventPublisher::new()
            .with_publisher(LoggingEventPublisher::debug_level())
            .with_publisher(collector.clone());
        assert_eq!(composite.len(), 2);

        let event = ResolutionEvent::cache_cleared(0, 0);
        composite.publish(event).await.unwrap();
        assert_eq!(collector.len(), 1);
    }
}
