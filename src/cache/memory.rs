//! In-Memory Tier
//!
//! Unbounded `DashMap`-backed [`Tier`] used in place of the on-disk store by
//! `--ephemeral` runs and by tests that need a tier with no file system.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::entry::{LookupKey, SourceTier};
use crate::domain::ports::Tier;
use crate::error::{Error, Result};

/// In-memory stand-in for the persistent tier
pub struct InMemoryTier {
    /// Storage - sharded for concurrent access
    storage: DashMap<LookupKey, Bytes>,
    /// Source reported for hits
    source: SourceTier,
    /// Statistics
    total_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl Default for InMemoryTier {
    fn default() -> Self {
        Self::new(SourceTier::Persistent)
    }
}

impl InMemoryTier {
    /// Create an empty tier reporting `source` for its hits
    pub fn new(source: SourceTier) -> Self {
        Self {
            storage: DashMap::new(),
            source,
            total_bytes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Bytes currently stored
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Read operations served
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Write operations served
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Tier for InMemoryTier {
    fn name(&self) -> &str {
        "In-Memory Store"
    }

    fn source(&self) -> SourceTier {
        self.source
    }

    async fn contains(&self, key: &LookupKey) -> Result<bool> {
        Ok(self.storage.contains_key(key))
    }

    async fn get(&self, key: &LookupKey) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.storage.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &LookupKey, payload: Bytes) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload(key.to_string()));
        }
        self.writes.fetch_add(1, Ordering::Relaxed);

        // Byte accounting happens under the key's shard lock
        let size = payload.len() as u64;
        match self.storage.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let old_size = entry.get().len() as u64;
                if size >= old_size {
                    self.total_bytes.fetch_add(size - old_size, Ordering::Relaxed);
                } else {
                    self.total_bytes.fetch_sub(old_size - size, Ordering::Relaxed);
                }
                entry.insert(payload);
            }
            Entry::Vacant(entry) => {
                self.total_bytes.fetch_add(size, Ordering::Relaxed);
                entry.insert(payload);
            }
        }
        Ok(())
    }

    async fn clear(&self) -> Result<u64> {
        let mut removed = 0u64;
        self.storage.retain(|_, payload| {
            self.total_bytes
                .fetch_sub(payload.len() as u64, Ordering::Relaxed);
            removed += 1;
            false
        });
        Ok(removed)
    }
}
