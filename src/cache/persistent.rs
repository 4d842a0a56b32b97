//! Persistent Tier - On-Disk Cache
//!
//! One file per entry under a dedicated root directory. The file name is the
//! escaped lookup key and the contents are the raw payload bytes. There is no
//! manifest; the directory listing is the index.
//!
//! # Design
//!
//! - Writes go to a uniquely named temporary file which is renamed over the
//!   target, so a reader never observes a partial payload
//! - A root-level lock lets `clear` exclude every entry operation, and a
//!   striped per-key lock array lets different keys proceed in parallel
//! - All file I/O runs on the blocking thread pool

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::entry::{LookupKey, SourceTier};
use super::escape::{escape_key, is_temp_file_name, temp_file_name, unescape_key};
use super::DEFAULT_LOCK_STRIPES;
use crate::domain::ports::Tier;
use crate::error::{Error, Result};

/// Persistent tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentTierConfig {
    /// Storage root; created on first write
    pub root: PathBuf,
    /// Number of per-key lock stripes (power of two)
    pub lock_stripes: usize,
    /// Flush file contents to the device before publishing them
    pub fsync: bool,
}

impl Default for PersistentTierConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("tierfetch").join("images"),
            lock_stripes: DEFAULT_LOCK_STRIPES,
            fsync: true,
        }
    }
}

impl PersistentTierConfig {
    /// Configuration rooted at `root` with defaults otherwise
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }
}

struct Inner {
    root: PathBuf,
    /// Shared by entry operations, exclusive for `clear`
    root_lock: RwLock<()>,
    stripes: Vec<RwLock<()>>,
    fsync: bool,
    reads: AtomicU64,
    writes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Inner {
    fn stripe(&self, key: &LookupKey) -> &RwLock<()> {
        &self.stripes[key.stripe_index(self.stripes.len())]
    }

    fn entry_path(&self, key: &LookupKey) -> Result<PathBuf> {
        Ok(self.root.join(escape_key(key.as_str())?))
    }

    fn read(&self, key: &LookupKey) -> Result<Option<Bytes>> {
        let path = self.entry_path(key)?;
        let _root = self.root_lock.read();
        let _entry = self.stripe(key).read();

        self.reads.fetch_add(1, Ordering::Relaxed);
        match fs::read(&path) {
            Ok(data) if data.is_empty() => {
                debug!(path = %path.display(), "Ignoring zero-length cache file");
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Ok(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => Err(Error::storage(path, e)),
        }
    }

    fn exists(&self, key: &LookupKey) -> Result<bool> {
        let path = self.entry_path(key)?;
        let _root = self.root_lock.read();
        let _entry = self.stripe(key).read();

        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file() && meta.len() > 0),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage(path, e)),
        }
    }

    fn write(&self, key: &LookupKey, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload(key.to_string()));
        }
        let path = self.entry_path(key)?;
        let _root = self.root_lock.read();
        let _entry = self.stripe(key).write();

        fs::create_dir_all(&self.root).map_err(|e| Error::storage(&self.root, e))?;

        let temp = self.root.join(temp_file_name());
        if let Err(e) = self.write_temp(&temp, payload) {
            let _ = fs::remove_file(&temp);
            return Err(Error::storage(temp, e));
        }
        if let Err(e) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(Error::storage(path, e));
        }

        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_temp(&self, temp: &Path, payload: &[u8]) -> io::Result<()> {
        let mut file = fs::File::create(temp)?;
        file.write_all(payload)?;
        if self.fsync {
            file.sync_all()?;
        }
        Ok(())
    }

    fn purge(&self) -> Result<u64> {
        let _root = self.root_lock.write();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::storage(&self.root, e)),
        };

        let mut removed = 0u64;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %self.root.display(), error = %e, "Failed to read cache directory entry");
                    continue;
                }
            };
            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => {
                    if !is_temp_file_name(&entry.file_name().to_string_lossy()) {
                        removed += 1;
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to delete cache file");
                }
            }
        }

        if let Err(e) = fs::remove_dir(&self.root) {
            warn!(root = %self.root.display(), error = %e, "Failed to remove cache directory");
        }

        Ok(removed)
    }

    fn list(&self) -> Result<Vec<String>> {
        let _root = self.root_lock.read();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage(&self.root, e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::storage(&self.root, e))?;
            if let Some(key) = entry.file_name().to_str().and_then(unescape_key) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn disk_usage(&self) -> Result<(u64, u64)> {
        let _root = self.root_lock.read();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((0, 0)),
            Err(e) => return Err(Error::storage(&self.root, e)),
        };

        let (mut count, mut bytes) = (0u64, 0u64);
        for entry in entries.flatten() {
            if is_temp_file_name(&entry.file_name().to_string_lossy()) {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if meta.is_file() {
                    count += 1;
                    bytes += meta.len();
                }
            }
        }
        Ok((count, bytes))
    }
}

/// Persistent tier - escaped-file-name store under a root directory
#[derive(Clone)]
pub struct PersistentTier {
    inner: Arc<Inner>,
}

impl PersistentTier {
    /// Create a tier rooted at `root` with default settings
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(PersistentTierConfig::with_root(root))
    }

    /// Create a tier from configuration. The root is not touched until the
    /// first write.
    pub fn with_config(config: PersistentTierConfig) -> Result<Self> {
        if config.lock_stripes == 0 || !config.lock_stripes.is_power_of_two() {
            return Err(Error::Config(format!(
                "lock_stripes must be a power of two, got {}",
                config.lock_stripes
            )));
        }
        if config.root.as_os_str().is_empty() {
            return Err(Error::Config("persistent root must not be empty".to_string()));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                root: config.root,
                root_lock: RwLock::new(()),
                stripes: (0..config.lock_stripes).map(|_| RwLock::new(())).collect(),
                fsync: config.fsync,
                reads: AtomicU64::new(0),
                writes: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        })
    }

    /// Storage root
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Path an entry for `key` is stored at
    pub fn entry_path(&self, key: &LookupKey) -> Result<PathBuf> {
        self.inner.entry_path(key)
    }

    /// All stored keys, sorted
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.blocking(|inner| inner.list()).await
    }

    /// Entry count and bytes on disk, plus operation counters
    pub async fn stats(&self) -> Result<PersistentTierStats> {
        let (entries, total_bytes) = self.blocking(|inner| inner.disk_usage()).await?;
        Ok(PersistentTierStats {
            entries,
            total_bytes,
            reads: self.inner.reads.load(Ordering::Relaxed),
            writes: self.inner.writes.load(Ordering::Relaxed),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| Error::Internal(format!("persistent tier task failed: {}", e)))?
    }
}

impl std::fmt::Debug for PersistentTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentTier")
            .field("root", &self.inner.root)
            .field("lock_stripes", &self.inner.stripes.len())
            .field("fsync", &self.inner.fsync)
            .finish()
    }
}

/// Persistent tier statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct PersistentTierStats {
    /// Files currently stored
    pub entries: u64,
    /// Bytes currently stored
    pub total_bytes: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Reads that found a payload
    pub hits: u64,
    /// Reads that found nothing
    pub misses: u64,
}

#[async_trait]
impl Tier for PersistentTier {
    fn name(&self) -> &str {
        "Disk Cache"
    }

    fn source(&self) -> SourceTier {
        SourceTier::Persistent
    }

    async fn contains(&self, key: &LookupKey) -> Result<bool> {
        let key = key.clone();
        self.blocking(move |inner| inner.exists(&key)).await
    }

    async fn get(&self, key: &LookupKey) -> Result<Option<Bytes>> {
        let key = key.clone();
        self.blocking(move |inner| inner.read(&key)).await
    }

    async fn put(&self, key: &LookupKey, payload: Bytes) -> Result<()> {
        let key = key.clone();
        self.blocking(move |inner| inner.write(&key, &payload)).await
    }

    async fn clear(&self) -> Result<u64> {
        self.blocking(|inner| inner.purge()).await
    }
}

// =============================================================================
// Tests
// =============================================================================
