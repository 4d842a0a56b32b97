//! Tiered Resolver - Fast → Persistent → Origin
//!
//! Resolves a key against the fast tier, then the persistent tier, then the
//! origin, returning the first hit and back-filling every faster tier that
//! missed.
//!
//! # Guarantees
//!
//! - Tiers are always consulted in cost order; a cheaper tier is never skipped
//! - Concurrent resolutions of one key share a single origin fetch
//! - A faulty cache tier degrades to a miss; only the origin can fail a call
//! - Back-fill never delays the caller and never surfaces an error
//! - Dropping a resolution future abandons only that caller; a running origin
//!   fetch completes and still populates the caches

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use super::decode::decode_payload;
use super::entry::{LookupKey, ResolvedImage, SourceTier};
use super::fast::FastTier;
use super::flight::{Admission, FlightGuard, FlightRegistry, FlightResult};
use super::metrics::{LatencyTracker, MetricsSnapshot, ResolverMetrics};
use crate::adapters::LoggingEventPublisher;
use crate::domain::events::ResolutionEvent;
use crate::domain::ports::{EventPublisher, OriginFetcher, Tier};
use crate::error::{Error, FetchError};

/// Resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Copy persistent and origin hits into the fast tier
    pub backfill_fast: bool,
    /// Copy origin hits into the persistent tier
    pub backfill_persistent: bool,
    /// Check persistent hits for a known image signature; a stored payload
    /// that fails the check is a miss
    pub verify_persistent: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            backfill_fast: true,
            backfill_persistent: true,
            verify_persistent: true,
        }
    }
}

struct ResolverInner {
    fast: Arc<FastTier>,
    persistent: Arc<dyn Tier>,
    origin: Arc<dyn OriginFetcher>,
    events: Arc<dyn EventPublisher>,
    metrics: Arc<ResolverMetrics>,
    flights: Arc<FlightRegistry>,
    /// Origin fetches and back-fill writes
    tasks: TaskTracker,
    config: ResolverConfig,
}

impl ResolverInner {
    async fn emit(&self, event: ResolutionEvent) {
        if let Err(e) = self.events.publish(event).await {
            debug!(error = %e, "Failed to publish resolution event");
        }
    }

    async fn tier_fault(&self, key: &LookupKey, tier: &dyn Tier, err: crate::error::Error) {
        warn!(key = %key, tier = tier.name(), error = %err, "Cache tier failed, treating as miss");
        self.metrics.record_tier_error(tier.source());
        self.emit(ResolutionEvent::tier_failed(key.as_str(), tier.source(), &err))
            .await;
    }

    /// Drop a stored payload that no longer looks like an image
    async fn verify_stored(&self, key: &LookupKey, payload: Bytes) -> Option<Bytes> {
        if !self.config.verify_persistent {
            return Some(payload);
        }
        match decode_payload(key.as_str(), payload, true) {
            Ok((payload, _)) => Some(payload),
            Err(e) => {
                self.tier_fault(key, self.persistent.as_ref(), Error::Fetch(e))
                    .await;
                None
            }
        }
    }

    fn backfill_fast(&self, key: &LookupKey, payload: Bytes) {
        let size = payload.len() as u64;
        debug!(key = %key, "Saving to: {}", Tier::name(self.fast.as_ref()));
        if self.fast.put(key.as_str(), payload) {
            self.metrics.record_backfill(SourceTier::Fast);
        } else {
            debug!(key = %key, bytes = size, "Payload exceeds fast tier budget");
        }
    }

    async fn backfill_persistent(&self, key: LookupKey, payload: Bytes) {
        let size = payload.len() as u64;
        debug!(key = %key, "Saving to: {}", self.persistent.name());
        match self.persistent.put(&key, payload).await {
            Ok(()) => {
                self.metrics.record_backfill(SourceTier::Persistent);
                self.emit(ResolutionEvent::backfill_completed(
                    key.as_str(),
                    SourceTier::Persistent,
                    size,
                ))
                .await;
            }
            Err(e) => {
                warn!(key = %key, tier = self.persistent.name(), error = %e, "Back-fill failed");
                self.metrics.record_backfill_failure();
                self.emit(ResolutionEvent::backfill_failed(
                    key.as_str(),
                    SourceTier::Persistent,
                    &e,
                ))
                .await;
            }
        }
    }
}

/// Body of a detached origin fetch
async fn run_flight(inner: Arc<ResolverInner>, key: LookupKey, id: u64) -> FlightResult {
    // Dropped last, after the fast tier holds the payload
    let _guard = FlightGuard::new(Arc::clone(&inner.flights), key.clone(), id);

    info!(key = %key, "Downloading from the Internet");
    inner.metrics.record_origin_fetch();
    inner
        .emit(ResolutionEvent::origin_fetch_started(key.as_str()))
        .await;

    let tracker = LatencyTracker::start();
    let result = match inner.origin.fetch(&key).await {
        Ok(payload) if payload.is_empty() => Err(FetchError::Decode {
            key: key.to_string(),
            reason: "origin returned an empty payload".to_string(),
        }),
        other => other,
    };
    inner
        .metrics
        .record_latency(SourceTier::Origin, tracker.elapsed());

    match &result {
        Ok(payload) => {
            inner.metrics.record_hit(SourceTier::Origin);
            if inner.config.backfill_fast {
                inner.backfill_fast(&key, payload.clone());
                inner
                    .emit(ResolutionEvent::backfill_completed(
                        key.as_str(),
                        SourceTier::Fast,
                        payload.len() as u64,
                    ))
                    .await;
            }
            if inner.config.backfill_persistent {
                let task_inner = Arc::clone(&inner);
                let task_key = key.clone();
                let task_payload = payload.clone();
                inner.tasks.spawn(async move {
                    task_inner
                        .backfill_persistent(task_key, task_payload)
                        .await
                });
            }
        }
        Err(e) => {
            inner.metrics.record_miss(SourceTier::Origin);
            warn!(key = %key, kind = e.kind(), error = %e, "Origin fetch failed");
            inner
                .emit(ResolutionEvent::origin_fetch_failed(key.as_str(), e.kind(), e))
                .await;
        }
    }

    result
}

/// Tiered resolver
///
/// Cheap to clone; clones share tiers, metrics and the in-flight registry.
#[derive(Clone)]
pub struct TieredResolver {
    inner: Arc<ResolverInner>,
}

impl TieredResolver {
    /// Create a resolver with default configuration that logs events
    pub fn new(
        fast: Arc<FastTier>,
        persistent: Arc<dyn Tier>,
        origin: Arc<dyn OriginFetcher>,
    ) -> Self {
        Self::builder(fast, persistent, origin).build()
    }

    /// Start building a resolver over the given tiers
    pub fn builder(
        fast: Arc<FastTier>,
        persistent: Arc<dyn Tier>,
        origin: Arc<dyn OriginFetcher>,
    ) -> TieredResolverBuilder {
        TieredResolverBuilder {
            fast,
            persistent,
            origin,
            events: None,
            metrics: None,
            config: ResolverConfig::default(),
        }
    }

    /// Resolve `key` through every tier.
    ///
    /// An empty or otherwise unusable key fails with
    /// [`FetchError::InvalidAddress`] before any tier is consulted.
    pub async fn resolve(&self, key: &str) -> Result<ResolvedImage, FetchError> {
        let key = LookupKey::new(key).map_err(|e| FetchError::InvalidAddress {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.resolve_key(&key).await
    }

    /// Resolve an already validated key
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn resolve_key(&self, key: &LookupKey) -> Result<ResolvedImage, FetchError> {
        let start = Instant::now();
        let inner = &self.inner;

        // Fast tier
        debug!("Checking: {}", Tier::name(inner.fast.as_ref()));
        let tracker = LatencyTracker::start();
        let fast_hit = inner.fast.get(key.as_str());
        inner.metrics.record_latency(SourceTier::Fast, tracker.elapsed());
        inner
            .emit(ResolutionEvent::tier_checked(key.as_str(), SourceTier::Fast, fast_hit.is_some()))
            .await;
        if let Some(payload) = fast_hit {
            inner.metrics.record_hit(SourceTier::Fast);
            return Ok(self.finish(key, payload, SourceTier::Fast, start).await);
        }
        inner.metrics.record_miss(SourceTier::Fast);

        // Persistent tier
        debug!("Checking: {}", inner.persistent.name());
        let tracker = LatencyTracker::start();
        let persistent_hit = match inner.persistent.get(key).await {
            Ok(Some(payload)) if !payload.is_empty() => inner.verify_stored(key, payload).await,
            Ok(_) => None,
            Err(e) => {
                inner.tier_fault(key, inner.persistent.as_ref(), e).await;
                None
            }
        };
        inner
            .metrics
            .record_latency(SourceTier::Persistent, tracker.elapsed());
        inner
            .emit(ResolutionEvent::tier_checked(
                key.as_str(),
                SourceTier::Persistent,
                persistent_hit.is_some(),
            ))
            .await;
        if let Some(payload) = persistent_hit {
            inner.metrics.record_hit(SourceTier::Persistent);
            if inner.config.backfill_fast {
                self.spawn_fast_backfill(key, payload.clone());
            }
            return Ok(self.finish(key, payload, SourceTier::Persistent, start).await);
        }
        inner.metrics.record_miss(SourceTier::Persistent);

        // Origin, shared with any concurrent caller
        let (payload, source) = self.fetch_shared(key).await?;
        Ok(self.finish(key, payload, source, start).await)
    }

    async fn fetch_shared(&self, key: &LookupKey) -> Result<(Bytes, SourceTier), FetchError> {
        let inner = &self.inner;
        let admission = inner.flights.admit(
            key,
            || inner.fast.get(key.as_str()),
            |id| {
                inner
                    .tasks
                    .spawn(run_flight(Arc::clone(inner), key.clone(), id))
            },
        );

        let fetch = match admission {
            Admission::Cached(payload) => {
                debug!("Populated by a concurrent fetch");
                inner.metrics.record_hit(SourceTier::Fast);
                return Ok((payload, SourceTier::Fast));
            }
            Admission::Joined(fetch) => {
                debug!("Joining in-flight origin fetch");
                inner.metrics.record_flight_join();
                fetch
            }
            Admission::Led(fetch) => fetch,
        };

        fetch.await.map(|payload| (payload, SourceTier::Origin))
    }

    fn spawn_fast_backfill(&self, key: &LookupKey, payload: Bytes) {
        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        self.inner.tasks.spawn(async move {
            let size = payload.len() as u64;
            inner.backfill_fast(&key, payload);
            inner
                .emit(ResolutionEvent::backfill_completed(
                    key.as_str(),
                    SourceTier::Fast,
                    size,
                ))
                .await;
        });
    }

    async fn finish(
        &self,
        key: &LookupKey,
        payload: Bytes,
        source: SourceTier,
        start: Instant,
    ) -> ResolvedImage {
        let latency = start.elapsed();
        let size = payload.len() as u64;
        self.inner.metrics.record_served(size);
        info!(source = source.as_str(), bytes = size, latency_ms = latency.as_millis() as u64, "Resolved");
        self.inner
            .emit(ResolutionEvent::resolved(key.as_str(), source, size, latency))
            .await;
        ResolvedImage::new(payload, source, latency)
    }

    /// Wait until every detached fetch and back-fill spawned so far has
    /// finished
    pub async fn wait_for_backfills(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    /// Number of origin fetches currently running
    pub fn in_flight(&self) -> usize {
        self.inner.flights.len()
    }

    /// Fast tier
    pub fn fast(&self) -> &Arc<FastTier> {
        &self.inner.fast
    }

    /// Persistent tier
    pub fn persistent(&self) -> &Arc<dyn Tier> {
        &self.inner.persistent
    }

    /// Shared metrics collector
    pub fn metrics(&self) -> &Arc<ResolverMetrics> {
        &self.inner.metrics
    }

    /// Snapshot of resolver metrics
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Get configuration
    pub fn config(&self) -> &ResolverConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for TieredResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredResolver")
            .field("fast", &Tier::name(self.inner.fast.as_ref()))
            .field("persistent", &self.inner.persistent.name())
            .field("in_flight", &self.inner.flights.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Builder for [`TieredResolver`]
pub struct TieredResolverBuilder {
    fast: Arc<FastTier>,
    persistent: Arc<dyn Tier>,
    origin: Arc<dyn OriginFetcher>,
    events: Option<Arc<dyn EventPublisher>>,
    metrics: Option<Arc<ResolverMetrics>>,
    config: ResolverConfig,
}

impl TieredResolverBuilder {
    /// Publish resolution events to `events` instead of the log
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Record into an existing metrics collector
    pub fn metrics(mut self, metrics: Arc<ResolverMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Override configuration
    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> TieredResolver {
        TieredResolver {
            inner: Arc::new(ResolverInner {
                fast: self.fast,
                persistent: self.persistent,
                origin: self.origin,
                events: self
                    .events
                    .unwrap_or_else(|| Arc::new(LoggingEventPublisher::debug_level())),
                metrics: self.metrics.unwrap_or_default(),
                flights: Arc::new(FlightRegistry::new()),
                tasks: TaskTracker::new(),
                config: self.config,
            }),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
