//! Cache Entry Types
//!
//! Lookup keys, source tiers and resolved images shared by every tier.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::decode::ImageFormat;
use crate::error::{Error, Result};

/// Lookup key - an opaque identifier for a resource, usually its URL
///
/// Cheap to clone; the string is shared.
#[derive(Clone, Eq)]
pub struct LookupKey {
    /// Pre-computed hash (for lock striping)
    hash: u64,
    /// Full key text
    key: Arc<str>,
}

impl LookupKey {
    /// Create a new lookup key. Empty keys are rejected.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key: String = key.into();
        if key.is_empty() {
            return Err(Error::InvalidKey("lookup key must not be empty".to_string()));
        }
        if key.contains('\0') {
            return Err(Error::InvalidKey(format!(
                "lookup key must not contain NUL: {:?}",
                key
            )));
        }

        Ok(Self {
            hash: Self::fx_hash(key.as_bytes()),
            key: Arc::from(key),
        })
    }

    /// Fast non-cryptographic hash (FxHash algorithm)
    #[inline]
    fn fx_hash(bytes: &[u8]) -> u64 {
        const SEED: u64 = 0x517cc1b727220a95;
        let mut hash = SEED;
        for &byte in bytes {
            hash = hash.rotate_left(5) ^ (byte as u64);
            hash = hash.wrapping_mul(SEED);
        }
        hash
    }

    /// Get the stripe index for this key (0..stripe_count)
    #[inline]
    pub fn stripe_index(&self, stripe_count: usize) -> usize {
        debug_assert!(stripe_count.is_power_of_two());
        (self.hash as usize) & (stripe_count - 1)
    }

    /// Get the key text
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl PartialEq for LookupKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.key == other.key
    }
}

impl Hash for LookupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Must agree with `str`'s Hash so `Borrow<str>` lookups work
        self.key.as_ref().hash(state);
    }
}

impl Borrow<str> for LookupKey {
    fn borrow(&self) -> &str {
        &self.key
    }
}

impl AsRef<str> for LookupKey {
    fn as_ref(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl fmt::Debug for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LookupKey").field(&self.as_str()).finish()
    }
}

impl TryFrom<&str> for LookupKey {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

/// Where a resolved image was found, in increasing cost order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    /// In-memory LRU
    Fast,
    /// On-disk file cache
    Persistent,
    /// Network download
    Origin,
}

impl SourceTier {
    /// All tiers in consultation order
    pub const ALL: [SourceTier; 3] = [SourceTier::Fast, SourceTier::Persistent, SourceTier::Origin];

    /// Lowercase label used in metrics and headers
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTier::Fast => "fast",
            SourceTier::Persistent => "persistent",
            SourceTier::Origin => "origin",
        }
    }
}

impl fmt::Display for SourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceTier::Fast => write!(f, "Fast (memory)"),
            SourceTier::Persistent => write!(f, "Persistent (disk)"),
            SourceTier::Origin => write!(f, "Origin (network)"),
        }
    }
}

/// A successfully resolved image and the tier that produced it
#[derive(Clone)]
pub struct ResolvedImage {
    /// Encoded image bytes (never empty)
    payload: Bytes,
    /// Tier the payload came from
    source: SourceTier,
    /// Format detected from the payload signature
    format: ImageFormat,
    /// Time spent resolving
    latency: Duration,
}

impl ResolvedImage {
    /// Wrap a payload found in `source`.
    ///
    /// Tiers never hold empty payloads, so an empty one here is a bug upstream.
    pub fn new(payload: Bytes, source: SourceTier, latency: Duration) -> Self {
        debug_assert!(!payload.is_empty(), "resolved payload must not be empty");
        let format = ImageFormat::detect(&payload);
        Self {
            payload,
            source,
            format,
            latency,
        }
    }

    /// Get payload (zero-copy)
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume into the payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Tier the image came from
    #[inline]
    pub fn source(&self) -> SourceTier {
        self.source
    }

    /// Detected image format
    #[inline]
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Resolution latency
    #[inline]
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Payload size in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Always false for a resolved image; present for API symmetry
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Debug for ResolvedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedImage")
            .field("size", &self.payload.len())
            .field("source", &self.source)
            .field("format", &self.format)
            .field("latency", &self.latency)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
