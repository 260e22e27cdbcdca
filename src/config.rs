//! Region configuration
//!
//! Loaded from JSON or YAML, every field optional:
//!
//! ```yaml
//! name: orders
//! versioned: true
//! compression: lz4
//! off_heap:
//!   enabled: true
//!   capacity_bytes: 67108864
//! eviction:
//!   action: overflow_to_disk
//!   limit:
//!     memory_bytes: 33554432
//!   clock:
//!     coarse:
//!       resolution_ms: 10
//! overflow:
//!   directory: /var/lib/regionstore/orders
//!   max_bytes: 1073741824
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::compression::CompressionAlgorithm;
use crate::error::{Error, Result};
use crate::eviction::{EvictionLimit, RecencyClock};

/// Configuration for one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Region name, used in logs and metric labels
    pub name: String,

    /// Carry a version stamp on every entry
    pub versioned: bool,

    /// Encode primitive and short string keys inline.
    /// When false every key is held as a generic key object.
    pub inline_keys: bool,

    /// Compression applied to values before they are stored in an entry
    pub compression: CompressionAlgorithm,

    pub off_heap: OffHeapConfig,

    pub eviction: EvictionConfig,

    pub overflow: OverflowConfig,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            versioned: false,
            inline_keys: true,
            compression: CompressionAlgorithm::None,
            off_heap: OffHeapConfig::default(),
            eviction: EvictionConfig::default(),
            overflow: OverflowConfig::default(),
        }
    }
}

impl RegionConfig {
    /// Load a config file; the format follows the extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;

        let config: RegionConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported config format {:?} for {}",
                    other.unwrap_or(""),
                    path.display()
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("region name must not be empty".into()));
        }

        if self.off_heap.enabled && self.off_heap.capacity_bytes == 0 {
            return Err(Error::Config(
                "off_heap.capacity_bytes must be positive when off-heap storage is enabled".into(),
            ));
        }

        match (self.eviction.action, self.eviction.limit) {
            (EvictionAction::None, EvictionLimit::None) => {}
            (EvictionAction::None, limit) => {
                return Err(Error::Config(format!(
                    "eviction limit {:?} configured without an eviction action",
                    limit
                )))
            }
            (EvictionAction::OverflowToDisk, EvictionLimit::None) => {
                return Err(Error::Config(
                    "overflow_to_disk requires an eviction limit".into(),
                ))
            }
            (EvictionAction::OverflowToDisk, EvictionLimit::EntryCount(0))
            | (EvictionAction::OverflowToDisk, EvictionLimit::MemoryBytes(0)) => {
                return Err(Error::Config("eviction limit must be positive".into()))
            }
            _ => {}
        }

        if let RecencyClock::Coarse { resolution_ms: 0 } = self.eviction.clock {
            return Err(Error::Config(
                "coarse clock resolution must be at least 1ms".into(),
            ));
        }

        if self.overflow.max_bytes == 0 {
            return Err(Error::Config("overflow.max_bytes must be positive".into()));
        }

        Ok(())
    }

    /// Whether entries are subject to disk-LRU eviction
    pub fn is_disk_lru(&self) -> bool {
        self.eviction.action == EvictionAction::OverflowToDisk
    }
}

/// Off-heap storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffHeapConfig {
    pub enabled: bool,
    /// Hard ceiling on arena bytes
    pub capacity_bytes: usize,
}

impl Default for OffHeapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity_bytes: 64 * 1024 * 1024,
        }
    }
}

/// What happens to entries once the limit is exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionAction {
    #[default]
    None,
    OverflowToDisk,
}

/// Eviction settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    pub action: EvictionAction,
    /// Written as `limit: {entry_count: n}` in both JSON and YAML
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub limit: EvictionLimit,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub clock: RecencyClock,
}

/// Overflow store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverflowConfig {
    /// Directory for the overflow file; in-memory store when absent
    pub directory: Option<PathBuf>,
    /// Ceiling on bytes held by the store
    pub max_bytes: u64,
    /// Compression applied to persisted slots
    pub compression: CompressionAlgorithm,
    /// Slots smaller than this are persisted raw
    pub min_compress_bytes: usize,
}

impl Default for OverflowConfig {
    fn default() -> Self {
        Self {
            directory: None,
            max_bytes: 1024 * 1024 * 1024,
            compression: CompressionAlgorithm::Lz4,
            min_compress_bytes: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = RegionConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.inline_keys);
        assert!(!config.is_disk_lru());
    }

    #[test]
    fn test_validate_rejects_zero_off_heap_capacity() {
        let mut config = RegionConfig::default();
        config.off_heap.enabled = true;
        config.off_heap.capacity_bytes = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_requires_action_and_limit_together() {
        let mut config = RegionConfig::default();
        config.eviction.limit = EvictionLimit::EntryCount(10);
        assert!(config.validate().is_err());

        config.eviction.limit = EvictionLimit::None;
        config.eviction.action = EvictionAction::OverflowToDisk;
        assert!(config.validate().is_err());

        config.eviction.limit = EvictionLimit::EntryCount(10);
        assert!(config.validate().is_ok());
        assert!(config.is_disk_lru());
    }

    #[test]
    fn test_validate_rejects_zero_resolution() {
        let mut config = RegionConfig::default();
        config.eviction.clock = RecencyClock::Coarse { resolution_ms: 0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
name: orders
versioned: true
compression: lz4
off_heap:
  enabled: true
  capacity_bytes: 4096
eviction:
  action: overflow_to_disk
  limit:
    memory_bytes: 2048
  clock:
    coarse:
      resolution_ms: 10
"#;
        let config: RegionConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.name, "orders");
        assert!(config.versioned);
        assert_eq!(config.compression, CompressionAlgorithm::Lz4);
        assert_eq!(config.off_heap.capacity_bytes, 4096);
        assert_eq!(config.eviction.limit, EvictionLimit::MemoryBytes(2048));
        assert_eq!(
            config.eviction.clock,
            RecencyClock::Coarse { resolution_ms: 10 }
        );
        // untouched sections keep their defaults
        assert_eq!(config.overflow, OverflowConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_eviction_forms() {
        let yaml = r#"
action: overflow_to_disk
limit:
  entry_count: 8
clock: logical
"#;
        let eviction: EvictionConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(eviction.limit, EvictionLimit::EntryCount(8));
        assert_eq!(eviction.clock, RecencyClock::Logical);

        let eviction: EvictionConfig = serde_yaml::from_str("limit: none\n").unwrap();
        assert_eq!(eviction.limit, EvictionLimit::None);
        assert_eq!(eviction.action, EvictionAction::None);
    }

    #[test]
    fn test_eviction_config_yaml_and_json_agree() {
        let eviction = EvictionConfig {
            action: EvictionAction::OverflowToDisk,
            limit: EvictionLimit::MemoryBytes(4096),
            clock: RecencyClock::Coarse { resolution_ms: 5 },
        };

        let yaml = serde_yaml::to_string(&eviction).unwrap();
        assert!(!yaml.contains('!'));
        assert_eq!(serde_yaml::from_str::<EvictionConfig>(&yaml).unwrap(), eviction);

        let json = serde_json::to_string(&eviction).unwrap();
        assert!(json.contains(r#""limit":{"memory_bytes":4096}"#));
        assert_eq!(serde_json::from_str::<EvictionConfig>(&json).unwrap(), eviction);
    }

    #[test]
    fn test_from_path_yaml_with_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.yml");
        std::fs::write(
            &path,
            "name: spill\neviction:\n  action: overflow_to_disk\n  limit:\n    memory_bytes: 2048\n",
        )
        .unwrap();

        let config = RegionConfig::from_path(&path).unwrap();
        assert!(config.is_disk_lru());
        assert_eq!(config.eviction.limit, EvictionLimit::MemoryBytes(2048));
    }

    #[test]
    fn test_from_path_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"name": "sessions", "eviction": {{"action": "overflow_to_disk", "limit": {{"entry_count": 100}}}}}}"#
        )
        .unwrap();

        let config = RegionConfig::from_path(&path).unwrap();
        assert_eq!(config.name, "sessions");
        assert_eq!(config.eviction.limit, EvictionLimit::EntryCount(100));
    }

    #[test]
    fn test_from_path_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.toml");
        std::fs::write(&path, "name = 'x'").unwrap();
        assert!(matches!(
            RegionConfig::from_path(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_from_path_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.yaml");
        std::fs::write(&path, "name: ''\n").unwrap();
        assert!(matches!(
            RegionConfig::from_path(&path),
            Err(Error::Config(_))
        ));
    }
}
