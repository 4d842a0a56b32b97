//! Domain Layer
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for tiers, the origin and event sinks
//! - **Events** (`events.rs`) - Resolution events for audit and observation
//!
//! # Usage
//!
//! ```ignore
//! use tierfetch::domain::ports::{OriginFetcher, Tier};
//!
//! async fn warm<T: Tier, O: OriginFetcher>(tier: &T, origin: &O, key: &LookupKey) -> Result<()> {
//!     let payload = origin.fetch(key).await?;
//!     tier.put(key, payload).await
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::ResolutionEvent;
pub use ports::{EventPublisher, OriginFetcher, Tier};
