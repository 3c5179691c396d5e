use crate::error::{Result, StorageError};
use crate::index::TrieConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Garbage collection thresholds for a shard's logs.
///
/// Both the index and the data checks use the same hysteresis band: below
/// the minimum nothing happens, above the maximum GC always runs, and in
/// between it runs only once the live fraction drops to `live_ratio` or less.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GcConfig {
    /// Dead index records below which index GC never runs (default: 100).
    pub index_min_dead: u64,

    /// Dead index records at or above which index GC always runs (default: 10_000).
    pub index_max_dead: u64,

    /// Dead data bytes below which data GC never runs (default: 16KB).
    pub data_min_dead: u64,

    /// Dead data bytes at or above which data GC always runs (default: 64MB).
    pub data_max_dead: u64,

    /// Live fraction above which a dead amount inside the band is tolerated
    /// (default: 0.8).
    pub live_ratio: f64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            index_min_dead: 100,
            index_max_dead: 10_000,
            data_min_dead: 16 * 1024,          // 16KB
            data_max_dead: 64 * 1024 * 1024,   // 64MB
            live_ratio: 0.8,
        }
    }
}

/// Configuration for the storage engine.
///
/// The persisted form lives in `config.json` under `data_dir`; `readonly` is
/// a per-process choice and is never written out.
///
/// # Example
///
/// ```
/// use triekv::Config;
/// use std::path::PathBuf;
///
/// let config = Config::new(PathBuf::from("./data"))
///     .with_value_cache_size(10_000)
///     .with_shard_cache_size(64);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory holding the name directory and all shard files.
    pub data_dir: PathBuf,

    /// Open the store without ever writing to it.
    #[serde(skip)]
    pub readonly: bool,

    /// Capacity of the decoded value cache (default: 1_000_000 entries).
    pub value_cache_size: usize,

    /// Capacity of the open shard cache.
    ///
    /// When absent it is derived from the number of possible shard names,
    /// see [`Config::shard_cache_capacity`].
    #[serde(default)]
    pub shard_cache_size: Option<usize>,

    /// Trie leaf capacities used by every shard.
    #[serde(default)]
    pub trie: TrieConfig,

    /// Shard GC thresholds.
    #[serde(default)]
    pub gc: GcConfig,
}

impl Config {
    /// Creates a configuration rooted at `data_dir` with default values.
    ///
    /// # Default Values
    ///
    /// - Value cache: 1_000_000 entries
    /// - Shard cache: derived from the shard space
    /// - Trie: base threshold 1, at most 128 leaves per bucket
    /// - GC: see [`GcConfig::default`]
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            readonly: false,
            value_cache_size: 1_000_000,
            shard_cache_size: None,
            trie: TrieConfig::default(),
            gc: GcConfig::default(),
        }
    }

    /// Validates the configuration parameters.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The data directory is empty
    /// - A cache capacity is below 2
    /// - A trie threshold is zero
    /// - A GC minimum exceeds its maximum
    /// - `live_ratio` is outside (0, 1]
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(StorageError::ConfigError(
                "data_dir cannot be empty".to_string()
            ));
        }

        if self.value_cache_size < 2 {
            return Err(StorageError::ConfigError(
                "value_cache_size must be at least 2".to_string()
            ));
        }
        if matches!(self.shard_cache_size, Some(size) if size < 2) {
            return Err(StorageError::ConfigError(
                "shard_cache_size must be at least 2".to_string()
            ));
        }

        if self.trie.base_threshold == 0 || self.trie.max_leaves == 0 {
            return Err(StorageError::ConfigError(
                "trie thresholds must be at least 1".to_string()
            ));
        }

        if self.gc.index_min_dead > self.gc.index_max_dead {
            return Err(StorageError::ConfigError(
                "index_min_dead cannot exceed index_max_dead".to_string()
            ));
        }
        if self.gc.data_min_dead > self.gc.data_max_dead {
            return Err(StorageError::ConfigError(
                "data_min_dead cannot exceed data_max_dead".to_string()
            ));
        }
        if !(self.gc.live_ratio > 0.0 && self.gc.live_ratio <= 1.0) {
            return Err(StorageError::ConfigError(
                "live_ratio must be within (0, 1]".to_string()
            ));
        }

        Ok(())
    }

    /// Number of shard stores kept open for a store with `shard_space`
    /// possible shard names.
    pub fn shard_cache_capacity(&self, shard_space: u64) -> usize {
        if let Some(size) = self.shard_cache_size {
            return size.max(2);
        }
        let space = usize::try_from(shard_space).unwrap_or(usize::MAX);
        let derived = if space < 500 { space } else { (space / 2).clamp(50, 500) };
        derived.max(2)
    }

    /// Open read-only
    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Set value cache capacity
    pub fn with_value_cache_size(mut self, size: usize) -> Self {
        self.value_cache_size = size;
        self
    }

    /// Set shard cache capacity
    pub fn with_shard_cache_size(mut self, size: usize) -> Self {
        self.shard_cache_size = Some(size);
        self
    }

    /// Set trie thresholds
    pub fn with_trie_config(mut self, trie: TrieConfig) -> Self {
        self.trie = trie;
        self
    }

    /// Set GC thresholds
    pub fn with_gc_config(mut self, gc: GcConfig) -> Self {
        self.gc = gc;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(PathBuf::from("./data"))
    }
}
