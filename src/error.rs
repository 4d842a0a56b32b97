//! Error types for the tiered image loader

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the loader.
///
/// Only [`FetchError`] ever reaches a caller of `resolve`; everything else is
/// either absorbed by the resolver (a tier fault degrades to a miss) or
/// surfaces from construction and administrative paths.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistent tier I/O failure (permission, disk full, corrupt read)
    #[error("Storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Key cannot be represented as a cache file name
    #[error("Cannot encode key '{key}' as a cache file name: {reason}")]
    KeyEncoding { key: String, reason: String },

    /// Lookup key rejected at construction
    #[error("Invalid lookup key: {0}")]
    InvalidKey(String),

    /// Attempt to store an empty payload
    #[error("Refusing to store empty payload for key: {0}")]
    EmptyPayload(String),

    /// Origin fetch failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics encoding error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a storage error for `path`.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Failure of the origin tier, the last fallback of a resolution.
///
/// Cloneable so that a single in-flight download can hand the same outcome to
/// every caller waiting on it. Transport causes are carried as rendered text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Key is not a fetchable address
    #[error("Invalid origin address '{key}': {reason}")]
    InvalidAddress { key: String, reason: String },

    /// Connection could not be established
    #[error("Connection to origin failed for '{key}': {reason}")]
    Connect { key: String, reason: String },

    /// Origin answered with a non-success status
    #[error("Origin returned HTTP {status} for '{key}'")]
    Status { key: String, status: u16 },

    /// Request did not complete within the configured timeout
    #[error("Origin fetch for '{key}' timed out after {after:?}")]
    Timeout { key: String, after: Duration },

    /// Response body could not be read
    #[error("Failed to read origin response body for '{key}': {reason}")]
    Body { key: String, reason: String },

    /// Payload is not a decodable image
    #[error("Failed to decode payload for '{key}': {reason}")]
    Decode { key: String, reason: String },

    /// Payload exceeds the configured size limit
    #[error("Origin payload for '{key}' exceeds {limit} bytes")]
    TooLarge { key: String, limit: u64 },

    /// The shared fetch task ended without producing a result
    #[error("Origin fetch for '{key}' was aborted: {reason}")]
    Aborted { key: String, reason: String },
}

impl FetchError {
    /// Key the failed fetch was issued for
    pub fn key(&self) -> &str {
        match self {
            FetchError::InvalidAddress { key, .. }
            | FetchError::Connect { key, .. }
            | FetchError::Status { key, .. }
            | FetchError::Timeout { key, .. }
            | FetchError::Body { key, .. }
            | FetchError::Decode { key, .. }
            | FetchError::TooLarge { key, .. }
            | FetchError::Aborted { key, .. } => key,
        }
    }

    /// Short machine-readable name of the failure class
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::InvalidAddress { .. } => "invalid_address",
            FetchError::Connect { .. } => "connect",
            FetchError::Status { .. } => "status",
            FetchError::Timeout { .. } => "timeout",
            FetchError::Body { .. } => "body",
            FetchError::Decode { .. } => "decode",
            FetchError::TooLarge { .. } => "too_large",
            FetchError::Aborted { .. } => "aborted",
        }
    }

    /// Check if the failure was a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }
}

// =============================================================================
// Tests
// =============================================================================
