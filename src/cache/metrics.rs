//! Resolver Metrics Collection
//!
//! Lock-free counters and latency averages for monitoring resolver health.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::entry::SourceTier;

/// Resolver metrics collector
#[derive(Debug, Default)]
pub struct ResolverMetrics {
    // Fast tier
    fast_hits: AtomicU64,
    fast_misses: AtomicU64,
    fast_errors: AtomicU64,

    // Persistent tier
    persistent_hits: AtomicU64,
    persistent_misses: AtomicU64,
    persistent_errors: AtomicU64,

    // Origin
    origin_fetches: AtomicU64,
    origin_successes: AtomicU64,
    origin_failures: AtomicU64,
    flight_joins: AtomicU64,

    // Back-fill
    backfills_fast: AtomicU64,
    backfills_persistent: AtomicU64,
    backfill_failures: AtomicU64,

    // Latencies (microseconds, exponential moving average)
    fast_latency_us: AtomicU64,
    persistent_latency_us: AtomicU64,
    origin_latency_us: AtomicU64,

    // Payload volume by source
    bytes_served: AtomicU64,
}

impl ResolverMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, tier: SourceTier) {
        match tier {
            SourceTier::Fast => self.fast_hits.fetch_add(1, Ordering::Relaxed),
            SourceTier::Persistent => self.persistent_hits.fetch_add(1, Ordering::Relaxed),
            SourceTier::Origin => self.origin_successes.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_miss(&self, tier: SourceTier) {
        match tier {
            SourceTier::Fast => self.fast_misses.fetch_add(1, Ordering::Relaxed),
            SourceTier::Persistent => self.persistent_misses.fetch_add(1, Ordering::Relaxed),
            SourceTier::Origin => self.origin_failures.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// A tier fault that was degraded to a miss
    pub fn record_tier_error(&self, tier: SourceTier) {
        match tier {
            SourceTier::Fast => self.fast_errors.fetch_add(1, Ordering::Relaxed),
            SourceTier::Persistent => self.persistent_errors.fetch_add(1, Ordering::Relaxed),
            SourceTier::Origin => self.origin_failures.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_origin_fetch(&self) {
        self.origin_fetches.fetch_add(1, Ordering::Relaxed);
    }

    /// A caller that attached to an already running origin fetch
    pub fn record_flight_join(&self) {
        self.flight_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backfill(&self, tier: SourceTier) {
        match tier {
            SourceTier::Fast => self.backfills_fast.fetch_add(1, Ordering::Relaxed),
            SourceTier::Persistent => self.backfills_persistent.fetch_add(1, Ordering::Relaxed),
            SourceTier::Origin => 0,
        };
    }

    pub fn record_backfill_failure(&self) {
        self.backfill_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_served(&self, bytes: u64) {
        self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_latency(&self, tier: SourceTier, duration: Duration) {
        let target = match tier {
            SourceTier::Fast => &self.fast_latency_us,
            SourceTier::Persistent => &self.persistent_latency_us,
            SourceTier::Origin => &self.origin_latency_us,
        };
        Self::update_latency_ema(target, duration);
    }

    fn update_latency_ema(target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn hits(&self, tier: SourceTier) -> u64 {
        match tier {
            SourceTier::Fast => self.fast_hits.load(Ordering::Relaxed),
            SourceTier::Persistent => self.persistent_hits.load(Ordering::Relaxed),
            SourceTier::Origin => self.origin_successes.load(Ordering::Relaxed),
        }
    }

    pub fn misses(&self, tier: SourceTier) -> u64 {
        match tier {
            SourceTier::Fast => self.fast_misses.load(Ordering::Relaxed),
            SourceTier::Persistent => self.persistent_misses.load(Ordering::Relaxed),
            SourceTier::Origin => self.origin_failures.load(Ordering::Relaxed),
        }
    }

    pub fn tier_errors(&self, tier: SourceTier) -> u64 {
        match tier {
            SourceTier::Fast => self.fast_errors.load(Ordering::Relaxed),
            SourceTier::Persistent => self.persistent_errors.load(Ordering::Relaxed),
            SourceTier::Origin => 0,
        }
    }

    pub fn origin_fetches(&self) -> u64 {
        self.origin_fetches.load(Ordering::Relaxed)
    }

    pub fn flight_joins(&self) -> u64 {
        self.flight_joins.load(Ordering::Relaxed)
    }

    pub fn latency(&self, tier: SourceTier) -> Duration {
        let us = match tier {
            SourceTier::Fast => &self.fast_latency_us,
            SourceTier::Persistent => &self.persistent_latency_us,
            SourceTier::Origin => &self.origin_latency_us,
        };
        Duration::from_micros(us.load(Ordering::Relaxed))
    }

    /// Share of resolutions answered without touching the origin
    pub fn cache_hit_ratio(&self) -> f64 {
        let cached = self.hits(SourceTier::Fast) + self.hits(SourceTier::Persistent);
        let total = cached + self.origin_fetches();
        if total == 0 {
            0.0
        } else {
            cached as f64 / total as f64
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fast_hits: self.hits(SourceTier::Fast),
            fast_misses: self.misses(SourceTier::Fast),
            fast_errors: self.tier_errors(SourceTier::Fast),
            fast_latency_us: self.latency(SourceTier::Fast).as_micros() as u64,

            persistent_hits: self.hits(SourceTier::Persistent),
            persistent_misses: self.misses(SourceTier::Persistent),
            persistent_errors: self.tier_errors(SourceTier::Persistent),
            persistent_latency_us: self.latency(SourceTier::Persistent).as_micros() as u64,

            origin_fetches: self.origin_fetches(),
            origin_successes: self.hits(SourceTier::Origin),
            origin_failures: self.misses(SourceTier::Origin),
            origin_latency_us: self.latency(SourceTier::Origin).as_micros() as u64,
            flight_joins: self.flight_joins(),

            backfills_fast: self.backfills_fast.load(Ordering::Relaxed),
            backfills_persistent: self.backfills_persistent.load(Ordering::Relaxed),
            backfill_failures: self.backfill_failures.load(Ordering::Relaxed),

            bytes_served: self.bytes_served.load(Ordering::Relaxed),
            cache_hit_ratio: self.cache_hit_ratio(),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.fast_hits,
            &self.fast_misses,
            &self.fast_errors,
            &self.persistent_hits,
            &self.persistent_misses,
            &self.persistent_errors,
            &self.origin_fetches,
            &self.origin_successes,
            &self.origin_failures,
            &self.flight_joins,
            &self.backfills_fast,
            &self.backfills_persistent,
            &self.backfill_failures,
            &self.fast_latency_us,
            &self.persistent_latency_us,
            &self.origin_latency_us,
            &self.bytes_served,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of all resolver metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    // Fast
    pub fast_hits: u64,
    pub fast_misses: u64,
    pub fast_errors: u64,
    pub fast_latency_us: u64,

    // Persistent
    pub persistent_hits: u64,
    pub persistent_misses: u64,
    pub persistent_errors: u64,
    pub persistent_latency_us: u64,

    // Origin
    pub origin_fetches: u64,
    pub origin_successes: u64,
    pub origin_failures: u64,
    pub origin_latency_us: u64,
    pub flight_joins: u64,

    // Back-fill
    pub backfills_fast: u64,
    pub backfills_persistent: u64,
    pub backfill_failures: u64,

    // Overall
    pub bytes_served: u64,
    pub cache_hit_ratio: f64,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================
