//! Fast Tier - In-Memory LRU Cache
//!
//! Process-lifetime cache of encoded image payloads, bounded by a byte budget.
//!
//! # Design
//!
//! - Single `parking_lot::Mutex` around an `lru::LruCache` for strict recency order
//! - Payloads are immutable `Bytes`, so a reader never sees a torn value
//! - Inserting beyond budget evicts least-recently-used entries until it fits

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::debug;

use super::entry::{LookupKey, SourceTier};
use super::{DEFAULT_MEMORY_BASIS, FAST_BUDGET_DIVISOR, MIN_FAST_CAPACITY};
use crate::domain::ports::Tier;
use crate::error::Result;

/// Fast tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FastTierConfig {
    /// Maximum capacity in bytes
    pub capacity_bytes: u64,
}

impl Default for FastTierConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: default_capacity_bytes(),
        }
    }
}

/// Byte budget derived from available memory.
///
/// Total memory ÷ 1024 ÷ 2000 kilobytes, floored at [`MIN_FAST_CAPACITY`].
pub fn default_capacity_bytes() -> u64 {
    let memory = system_memory_bytes().unwrap_or(DEFAULT_MEMORY_BASIS);
    capacity_for_memory(memory)
}

/// Byte budget for a machine with `memory_bytes` of memory
pub fn capacity_for_memory(memory_bytes: u64) -> u64 {
    let kilobytes = memory_bytes / 1024 / FAST_BUDGET_DIVISOR;
    (kilobytes * 1024).max(MIN_FAST_CAPACITY)
}

/// Total system memory, if the platform reports it
fn system_memory_bytes() -> Option<u64> {
    let mut system = System::new();
    system.refresh_memory();
    Some(system.total_memory()).filter(|total| *total > 0)
}

struct LruState {
    entries: LruCache<String, Bytes>,
    size: u64,
}

/// Fast tier - in-memory LRU cache
pub struct FastTier {
    /// Recency-ordered storage
    state: Mutex<LruState>,
    /// Configuration
    config: FastTierConfig,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
    /// Eviction count
    evictions: AtomicU64,
}

impl FastTier {
    /// Create a new fast tier with default configuration
    pub fn new() -> Self {
        Self::with_config(FastTierConfig::default())
    }

    /// Create a new fast tier with custom configuration
    pub fn with_config(config: FastTierConfig) -> Self {
        Self {
            state: Mutex::new(LruState {
                entries: LruCache::unbounded(),
                size: 0,
            }),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a fast tier holding at most `capacity_bytes`
    pub fn with_capacity(capacity_bytes: u64) -> Self {
        Self::with_config(FastTierConfig { capacity_bytes })
    }

    /// Get a payload, marking it most recently used
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let found = self.state.lock().entries.get(key).cloned();

        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };

        found
    }

    /// Check presence without touching recency
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains(key)
    }

    /// Insert or overwrite a payload.
    ///
    /// Returns false when the payload is empty or larger than the whole
    /// budget; any previous value for the key is dropped in that case.
    pub fn put(&self, key: &str, payload: Bytes) -> bool {
        let size = payload.len() as u64;
        let mut state = self.state.lock();

        if size == 0 || size > self.config.capacity_bytes {
            if let Some(old) = state.entries.pop(key) {
                state.size -= old.len() as u64;
            }
            return false;
        }

        if let Some(old) = state.entries.put(key.to_owned(), payload) {
            state.size -= old.len() as u64;
        }
        state.size += size;

        // The entry just inserted is most recent and fits alone, so it survives
        while state.size > self.config.capacity_bytes {
            match state.entries.pop_lru() {
                Some((evicted_key, evicted)) => {
                    state.size -= evicted.len() as u64;
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %evicted_key, bytes = evicted.len(), "Evicted from fast tier");
                }
                None => break,
            }
        }

        true
    }

    /// Remove an entry
    pub fn remove(&self, key: &str) -> Option<Bytes> {
        let mut state = self.state.lock();
        let removed = state.entries.pop(key);
        if let Some(ref payload) = removed {
            state.size -= payload.len() as u64;
        }
        removed
    }

    /// Drop every entry, returning how many there were
    pub fn clear(&self) -> u64 {
        let mut state = self.state.lock();
        let count = state.entries.len() as u64;
        state.entries.clear();
        state.size = 0;
        count
    }

    /// Keys from most to least recently used
    pub fn keys_by_recency(&self) -> Vec<String> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Get current size in bytes
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    /// Get capacity
    pub fn capacity(&self) -> u64 {
        self.config.capacity_bytes
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get utilization (0.0 - 1.0)
    pub fn utilization(&self) -> f64 {
        self.size() as f64 / self.capacity() as f64
    }

    /// Get cache statistics
    pub fn stats(&self) -> FastTierStats {
        let (entries, size) = {
            let state = self.state.lock();
            (state.entries.len(), state.size)
        };
        FastTierStats {
            size,
            capacity: self.capacity(),
            entries,
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            evictions: self.evictions(),
            utilization: size as f64 / self.capacity() as f64,
        }
    }
}

impl Default for FastTier {
    fn default() -> Self {
        Self::new()
    }
}

/// Fast tier statistics
#[derive(Debug, Clone, Serialize)]
pub struct FastTierStats {
    /// Current size in bytes
    pub size: u64,
    /// Capacity in bytes
    pub capacity: u64,
    /// Number of entries
    pub entries: usize,
    /// Hit count
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
    /// Eviction count
    pub evictions: u64,
    /// Utilization (0.0 - 1.0)
    pub utilization: f64,
}

#[async_trait]
impl Tier for FastTier {
    fn name(&self) -> &str {
        "Memory Cache"
    }

    fn source(&self) -> SourceTier {
        SourceTier::Fast
    }

    async fn contains(&self, key: &LookupKey) -> Result<bool> {
        Ok(FastTier::contains(self, key.as_str()))
    }

    async fn get(&self, key: &LookupKey) -> Result<Option<Bytes>> {
        Ok(FastTier::get(self, key.as_str()))
    }

    async fn put(&self, key: &LookupKey, payload: Bytes) -> Result<()> {
        let size = payload.len();
        if !FastTier::put(self, key.as_str(), payload) {
            debug!(key = %key, bytes = size, "Payload not admitted to fast tier");
        }
        Ok(())
    }

    async fn clear(&self) -> Result<u64> {
        Ok(FastTier::clear(self))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(data: &[u8]) -> Bytes {
        Bytes::copy_from_slice(data)
    }

    #[test]
    fn test_fast_tier_creation() {
        let tier = FastTier::with_capacity(1024);
        assert!(tier.is_empty());
        assert_eq!(tier.size(), 0);
        assert_eq!(tier.capacity(), 1024);
    }

    #[test]
    fn test_default_capacity_formula() {
        // 16 GiB of memory -> 8388 KiB budget
        let memory = 16 * 1024 * 1024 * 1024;
        assert_eq!(capacity_for_memory(memory), (memory / 1024 / 2000) * 1024);
        // Tiny machines still get the floor
        assert_eq!(capacity_for_memory(1024), MIN_FAST_CAPACITY);
        assert!(default_capacity_bytes() >= MIN_FAST_CAPACITY);
    }

    #[test]
    fn test_system_memory_detected() {
        let memory = system_memory_bytes().unwrap();
        assert!(memory > MIN_FAST_CAPACITY);
        assert_eq!(default_capacity_bytes(), capacity_for_memory(memory));
    }

    #[test]
    fn test_put_get() {
        let tier = FastTier::with_capacity(1024);

        assert!(tier.put("a", payload(b"Hello, World!")));
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.size(), 13);
        assert_eq!(tier.get("a").unwrap().as_ref(), b"Hello, World!");
    }

    #[test]
    fn test_miss_tracking() {
        let tier = FastTier::with_capacity(1024);
        assert!(tier.get("nope").is_none());
        assert_eq!(tier.misses(), 1);
        assert_eq!(tier.hits(), 0);
    }

    #[test]
    fn test_replace_updates_size() {
        let tier = FastTier::with_capacity(1024);

        tier.put("k", payload(b"original"));
        assert_eq!(tier.size(), 8);

        tier.put("k", payload(b"replaced content"));
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.size(), 16);
        assert_eq!(tier.get("k").unwrap().as_ref(), b"replaced content");
    }

    #[test]
    fn test_lru_eviction_order() {
        let tier = FastTier::with_capacity(300);

        tier.put("a", payload(&[1u8; 100]));
        tier.put("b", payload(&[2u8; 100]));
        tier.put("c", payload(&[3u8; 100]));

        // Touch "a" so "b" becomes least recently used
        assert!(tier.get("a").is_some());

        tier.put("d", payload(&[4u8; 100]));

        assert!(tier.contains("a"));
        assert!(!tier.contains("b"));
        assert!(tier.contains("c"));
        assert!(tier.contains("d"));
        assert_eq!(tier.size(), 300);
        assert_eq!(tier.evictions(), 1);
    }

    #[test]
    fn test_large_insert_evicts_several() {
        let tier = FastTier::with_capacity(300);
        tier.put("a", payload(&[1u8; 100]));
        tier.put("b", payload(&[2u8; 100]));
        tier.put("c", payload(&[3u8; 100]));

        tier.put("big", payload(&[9u8; 250]));

        assert_eq!(tier.keys_by_recency(), vec!["big".to_string()]);
        assert_eq!(tier.size(), 250);
        assert_eq!(tier.evictions(), 3);
    }

    #[test]
    fn test_contains_does_not_touch_recency() {
        let tier = FastTier::with_capacity(200);
        tier.put("a", payload(&[1u8; 100]));
        tier.put("b", payload(&[2u8; 100]));

        assert!(tier.contains("a"));
        tier.put("c", payload(&[3u8; 100]));

        // "a" was only peeked, so it was still the oldest
        assert!(!tier.contains("a"));
        assert!(tier.contains("b"));
    }

    #[test]
    fn test_oversize_and_empty_rejected() {
        let tier = FastTier::with_capacity(10);
        tier.put("k", payload(b"small"));

        assert!(!tier.put("k", payload(&[0u8; 11])));
        // Stale value must not linger after a rejected overwrite
        assert!(!tier.contains("k"));
        assert_eq!(tier.size(), 0);

        assert!(!tier.put("e", Bytes::new()));
        assert!(tier.is_empty());
    }

    #[test]
    fn test_remove_and_clear() {
        let tier = FastTier::with_capacity(10_000);
        for i in 0..10 {
            tier.put(&format!("k{}", i), payload(&[i as u8; 100]));
        }
        assert_eq!(tier.size(), 1000);

        assert!(tier.remove("k0").is_some());
        assert!(tier.remove("k0").is_none());
        assert_eq!(tier.size(), 900);

        assert_eq!(tier.clear(), 9);
        assert!(tier.is_empty());
        assert_eq!(tier.size(), 0);
        assert_eq!(tier.clear(), 0);
    }

    #[test]
    fn test_stats() {
        let tier = FastTier::with_capacity(100);
        tier.put("k", payload(b"test data"));
        tier.get("k");
        tier.get("missing");

        let stats = tier.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.size, 9);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_ratio, 0.5);
        assert!((stats.utilization - 0.09).abs() < 0.001);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let tier = Arc::new(FastTier::with_capacity(64 * 8 * 1000));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tier = Arc::clone(&tier);
                thread::spawn(move || {
                    for i in 0..1000 {
                        let key = format!("obj-{}-{}", t, i);
                        tier.put(&key, Bytes::from(vec![t as u8; 64]));
                        let got = tier.get(&key).unwrap();
                        assert!(got.iter().all(|b| *b == t as u8));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tier.len(), 8000);
        assert_eq!(tier.size(), 64 * 8000);
    }

    #[test]
    fn test_same_key_contention_never_tears() {
        use std::sync::Arc;
        use std::thread;

        const LEN: usize = 4096;
        let tier = Arc::new(FastTier::with_capacity(1 << 20));

        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let tier = Arc::clone(&tier);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        tier.put("shared", Bytes::from(vec![t; LEN]));
                        if let Some(got) = tier.get("shared") {
                            assert_eq!(got.len(), LEN);
                            assert!(got.iter().all(|b| *b == got[0]));
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tier.len(), 1);
        assert_eq!(tier.size(), LEN as u64);
    }

    #[tokio::test]
    async fn test_tier_trait() {
        let tier = FastTier::with_capacity(1024);
        let key = LookupKey::new("https://example.com/a.png").unwrap();

        assert!(!Tier::contains(&tier, &key).await.unwrap());
        Tier::put(&tier, &key, payload(b"img")).await.unwrap();
        assert!(Tier::contains(&tier, &key).await.unwrap());
        assert_eq!(Tier::get(&tier, &key).await.unwrap().unwrap().as_ref(), b"img");
        assert_eq!(Tier::clear(&tier).await.unwrap(), 1);
        assert_eq!(tier.source(), SourceTier::Fast);
        assert_eq!(tier.name(), "Memory Cache");
    }
}
