//! Infrastructure Adapters
//!
//! Adapter implementations for the domain ports that are not cache tiers.
//! The tiers themselves live in [`crate::cache`].
//!
//! # Usage
//!
//! ```ignore
//! use tierfetch::adapters::{CompositeEventPublisher, LoggingEventPublisher};
//!
//! let events = CompositeEventPublisher::new()
//!     .with_publisher(LoggingEventPublisher::info_level());
//! ```

mod event_publisher;

pub use event_publisher::{CompositeEventPublisher, InMemoryEventCollector, LoggingEventPublisher};
