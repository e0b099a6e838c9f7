//! HERMES Bus Configuration
//!
//! This module provides typed configuration for a bus instance. A config can
//! be built programmatically or loaded from a `hermes.yaml` file.
//!
//! # Example hermes.yaml
//!
//! ```yaml
//! name: telemetry
//!
//! # Capacity of the serialized log in bytes
//! max_file_size: 1048576
//!
//! # Concurrent reader permits (also the writer's exclusion batch)
//! max_reader_count: 6
//!
//! # Entries younger than this are never trimmed
//! min_message_age_ms: 500
//!
//! # Ceiling on any individual lock acquisition
//! wait_timeout_ms: 5000
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{HermesError, HermesResult};

/// Default capacity of the serialized log: 1 MiB.
pub const DEFAULT_MAX_FILE_SIZE: usize = 1_048_576;

/// Default number of concurrent reader permits.
pub const DEFAULT_MAX_READER_COUNT: u32 = 6;

/// Default minimum lifetime of a published entry before it may be trimmed.
pub const DEFAULT_MIN_MESSAGE_AGE_MS: u64 = 500;

/// Default ceiling on any individual lock acquisition.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5_000;

/// Bus configuration, typically from `hermes.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Bus name. Selects which participants on this host share a log:
    /// the names of all four backing kernel objects are derived from it.
    pub name: String,

    /// Capacity in bytes for the serialized log stored in the shared region
    pub max_file_size: usize,

    /// Reader permits of the named semaphore; a writer must drain all of
    /// them to gain exclusion
    pub max_reader_count: u32,

    /// Lower bound on the lifetime of a published entry before trimming
    pub min_message_age_ms: u64,

    /// Ceiling on any individual lock acquisition
    pub wait_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_reader_count: DEFAULT_MAX_READER_COUNT,
            min_message_age_ms: DEFAULT_MIN_MESSAGE_AGE_MS,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
        }
    }
}

impl BusConfig {
    /// Create a configuration with the given bus name and default tuning
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a YAML string
    pub fn from_yaml(content: &str) -> HermesResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load configuration from a file
    pub fn from_file(path: &std::path::Path) -> HermesResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Minimum entry lifetime as a `Duration`
    pub fn min_message_age(&self) -> Duration {
        Duration::from_millis(self.min_message_age_ms)
    }

    /// Lock acquisition ceiling as a `Duration`
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Validate the configuration.
    ///
    /// The name must be usable verbatim inside POSIX object names: non-empty,
    /// no path separators, no NUL bytes, and short enough that the prefixed
    /// object names stay under the system name limit.
    pub fn validate(&self) -> HermesResult<()> {
        if self.name.is_empty() {
            return Err(HermesError::InvalidName("name must not be empty".into()));
        }
        if self.name.contains('/') || self.name.contains('\0') {
            return Err(HermesError::InvalidName(format!(
                "name '{}' must not contain '/' or NUL",
                self.name.escape_default()
            )));
        }
        if self.name.len() > 200 {
            return Err(HermesError::InvalidName(format!(
                "name is {} bytes; the limit is 200",
                self.name.len()
            )));
        }
        if self.max_file_size == 0 {
            return Err(HermesError::InvalidCapacity(
                "max_file_size must be at least 1 byte".into(),
            ));
        }
        if self.max_file_size > u32::MAX as usize {
            return Err(HermesError::InvalidCapacity(format!(
                "max_file_size {} does not fit the 32-bit length header",
                self.max_file_size
            )));
        }
        if self.max_reader_count == 0 {
            return Err(HermesError::InvalidReaderCount(
                "max_reader_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BusConfig::new("metrics");
        assert_eq!(config.name, "metrics");
        assert_eq!(config.max_file_size, 1_048_576);
        assert_eq!(config.max_reader_count, 6);
        assert_eq!(config.min_message_age(), Duration::from_millis(500));
        assert_eq!(config.wait_timeout(), Duration::from_secs(5));
        config.validate().expect("defaults must validate");
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
name: telemetry
max_file_size: 4096
max_reader_count: 2
min_message_age_ms: 100
"#;
        let config = BusConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, "telemetry");
        assert_eq!(config.max_file_size, 4096);
        assert_eq!(config.max_reader_count, 2);
        assert_eq!(config.min_message_age_ms, 100);
        // Unspecified keys keep their defaults
        assert_eq!(config.wait_timeout_ms, 5_000);
    }

    #[test]
    fn test_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name: filecfg\nmax_reader_count: 3").unwrap();
        let config = BusConfig::from_file(file.path()).unwrap();
        assert_eq!(config.name, "filecfg");
        assert_eq!(config.max_reader_count, 3);
    }

    #[test]
    fn test_rejects_bad_name() {
        assert!(matches!(
            BusConfig::new("").validate(),
            Err(HermesError::InvalidName(_))
        ));
        assert!(matches!(
            BusConfig::new("a/b").validate(),
            Err(HermesError::InvalidName(_))
        ));
        assert!(matches!(
            BusConfig::new("x".repeat(201)).validate(),
            Err(HermesError::InvalidName(_))
        ));
    }

    #[test]
    fn test_rejects_bad_capacity_and_readers() {
        let mut config = BusConfig::new("ok");
        config.max_file_size = 0;
        assert!(matches!(
            config.validate(),
            Err(HermesError::InvalidCapacity(_))
        ));

        let mut config = BusConfig::new("ok");
        config.max_reader_count = 0;
        assert!(matches!(
            config.validate(),
            Err(HermesError::InvalidReaderCount(_))
        ));
    }
}
