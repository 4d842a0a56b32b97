//! Loader Configuration
//!
//! Defaults, overlaid by an optional YAML file, overlaid by command-line
//! flags in `main.rs`. Durations are written in seconds.
//!
//! ```yaml
//! fast:
//!   capacity_bytes: 67108864
//! persistent:
//!   root: /var/cache/tierfetch
//!   fsync: false
//! origin:
//!   timeout: 30
//!   max_body_bytes: 10485760
//! resolver:
//!   backfill_persistent: true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::{FastTierConfig, OriginConfig, PersistentTierConfig, ResolverConfig};
use crate::error::{Error, Result};

/// Complete loader configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    pub fast: FastTierConfig,
    pub persistent: PersistentTierConfig,
    pub origin: OriginConfig,
    pub resolver: ResolverConfig,
}

impl LoaderConfig {
    /// Load from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse YAML text
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.fast.capacity_bytes == 0 {
            return Err(Error::Config("fast.capacity_bytes must be positive".to_string()));
        }
        if self.persistent.lock_stripes == 0 || !self.persistent.lock_stripes.is_power_of_two() {
            return Err(Error::Config(format!(
                "persistent.lock_stripes must be a power of two, got {}",
                self.persistent.lock_stripes
            )));
        }
        if self.origin.timeout.is_zero() {
            return Err(Error::Config("origin.timeout must be positive".to_string()));
        }
        if self.origin.max_body_bytes == Some(0) {
            return Err(Error::Config("origin.max_body_bytes must be positive".to_string()));
        }
        Ok(())
    }
}

/// Serde adapter storing a `Duration` as whole seconds
pub mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.origin.timeout, Duration::from_secs(60));
        assert!(config.resolver.backfill_fast);
        assert!(config.fast.capacity_bytes >= crate::cache::MIN_FAST_CAPACITY);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = LoaderConfig::from_yaml_str(
            "origin:\n  timeout: 5\npersistent:\n  root: /tmp/images\n",
        )
        .unwrap();
        assert_eq!(config.origin.timeout, Duration::from_secs(5));
        assert!(config.origin.verify_image);
        assert_eq!(config.persistent.root, std::path::PathBuf::from("/tmp/images"));
        assert_eq!(config.persistent.lock_stripes, crate::cache::DEFAULT_LOCK_STRIPES);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = LoaderConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.origin.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert_matches!(
            LoaderConfig::from_yaml_str("persistent:\n  lock_stripes: 12\n"),
            Err(Error::Config(msg)) if msg.contains("lock_stripes")
        );
        assert_matches!(
            LoaderConfig::from_yaml_str("origin:\n  timeout: 0\n"),
            Err(Error::Config(_))
        );
        assert_matches!(
            LoaderConfig::from_yaml_str("unknown_section: 1\n"),
            Err(Error::Config(_))
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fast:\n  capacity_bytes: 2048").unwrap();

        let config = LoaderConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.fast.capacity_bytes, 2048);

        assert_matches!(
            LoaderConfig::from_yaml_file("/nonexistent/tierfetch.yaml"),
            Err(Error::Config(_))
        );
    }

    #[test]
    fn test_round_trip_through_yaml() {
        let config = LoaderConfig::default();
        let text = serde_yaml::to_string(&config).unwrap();
        let back = LoaderConfig::from_yaml_str(&text).unwrap();
        assert_eq!(back.origin.timeout, config.origin.timeout);
        assert_eq!(back.fast.capacity_bytes, config.fast.capacity_bytes);
    }
}
