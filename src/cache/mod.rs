//! Tiered Image Cache
//!
//! Resolves image payloads through a memory tier, a disk tier and the network.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                           TieredResolver                                 │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  FastTier (RAM)       │ PersistentTier (disk)  │ OriginFetcher (HTTP)    │
//! │  ┌────────────────┐   │ ┌──────────────────┐   │ ┌──────────────────┐    │
//! │  │ LruCache       │   │ │ one file per key │   │ │ reqwest GET      │    │
//! │  │ byte budget    │   │ │ escaped names    │   │ │ 60s timeout      │    │
//! │  └────────────────┘   │ └──────────────────┘   │ └──────────────────┘    │
//! │         ▲             │          ▲             │          │              │
//! │         └─────────────┴──────────┴─────────────┴──────────┘              │
//! │                     back-fill (detached tasks)                           │
//! │                                                                          │
//! │                 single-flight registry (one fetch per key)               │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lookup Order
//!
//! 1. Fast tier hit: return, nothing else touched
//! 2. Persistent hit: return, copy into the fast tier in the background
//! 3. Origin: one shared download per key; on success both tiers are filled

mod clearer;
mod decode;
mod entry;
mod escape;
mod fast;
mod flight;
mod memory;
mod metrics;
mod origin;
mod persistent;
mod proptest;
mod resolver;

use std::time::Duration;

pub use clearer::{CacheClearer, ClearReport};
pub use decode::{decode_payload, ImageFormat};
pub use entry::{LookupKey, ResolvedImage, SourceTier};
pub use escape::{escape_key, unescape_key, MAX_FILE_NAME_BYTES};
pub use fast::{default_capacity_bytes, FastTier, FastTierConfig, FastTierStats};
pub use memory::InMemoryTier;
pub use metrics::{LatencyTracker, MetricsSnapshot, ResolverMetrics};
pub use origin::{HttpOriginFetcher, OriginConfig};
pub use persistent::{PersistentTier, PersistentTierConfig, PersistentTierStats};
pub use resolver::{ResolverConfig, TieredResolver, TieredResolverBuilder};

/// Default origin request timeout
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of per-key lock stripes in the persistent tier
pub const DEFAULT_LOCK_STRIPES: usize = 64;

/// Fast tier budget is total memory / 1024 / this, in KiB
pub const FAST_BUDGET_DIVISOR: u64 = 2000;

/// Floor for the fast tier budget (1MB)
pub const MIN_FAST_CAPACITY: u64 = 1024 * 1024;

/// Memory assumed when the system total cannot be read (1GB)
pub const DEFAULT_MEMORY_BASIS: u64 = 1024 * 1024 * 1024;
