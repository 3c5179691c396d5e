use crate::cache::TieredCache;
use crate::config::Config;
use crate::error::{Result, StorageError};
use crate::keyclass::KeyClass;
use crate::log::backup_path;
use crate::metrics::Metrics;
use crate::names::{NameDirectory, Topology};
use crate::shard::{ShardOptions, ShardStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Main storage engine routing every key to its shard.
///
/// The `StorageEngine` is the primary interface for interacting with triekv.
/// It coordinates the name directory, a bounded cache of open shards and a
/// cache of values.
///
/// # Architecture
///
/// - **Name directory**: maps a key's fixed-length prefix to a shard and
///   records every shard ever written
/// - **Shard stores**: one radix trie over an index log and a data log per
///   shard, opened lazily and closed (synced) on eviction
/// - **Value cache**: values by full key, filled on reads and writes and
///   invalidated on deletes
///
/// # Example
///
/// ```no_run
/// use triekv::{Config, KeyClass, StorageEngine, Topology};
/// use std::path::PathBuf;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let topology = Topology::new(vec![2, 2], KeyClass::hex())?;
///     StorageEngine::init(&PathBuf::from("./data"), &topology)?;
///
///     let config = Config::new(PathBuf::from("./data"));
///     let mut engine = StorageEngine::open(config, topology)?;
///
///     engine.put("abcd01", b"value")?;
///     let value = engine.get("abcd01")?;
///
///     engine.close()?;
///     Ok(())
/// }
/// ```
pub struct StorageEngine {
    config: Config,
    names: NameDirectory,
    shards: TieredCache<String, ShardStore>,
    values: TieredCache<String, Vec<u8>>,
    shard_options: ShardOptions,
    metrics: Arc<Metrics>,
}

impl StorageEngine {
    /// Creates a new, empty store under `root`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInitialized` if `root` already holds a store.
    pub fn init(root: &Path, topology: &Topology) -> Result<()> {
        NameDirectory::init(root, topology)
    }

    /// Opens the store under `config.data_dir`, which must have been
    /// initialized with `topology`.
    ///
    /// # Arguments
    ///
    /// * `config` - Cache sizes, GC thresholds and the read-only flag
    /// * `topology` - Word partition and key class; the key class may carry
    ///   a length limit and extra rule the name directory does not persist
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid (`ConfigError`)
    /// - The store was never initialized (`NotInitialized`)
    /// - It was initialized with a different topology (`TopologyMismatch`)
    pub fn open(config: Config, topology: Topology) -> Result<Self> {
        config.validate()?;
        let names = NameDirectory::open_with(&config.data_dir, topology, config.readonly)?;
        Self::with_names(config, names)
    }

    /// Opens the store under `config.data_dir` with whatever topology it
    /// was initialized with.
    pub fn open_existing(config: Config) -> Result<Self> {
        config.validate()?;
        let names = NameDirectory::open(&config.data_dir, config.readonly)?;
        Self::with_names(config, names)
    }

    fn with_names(config: Config, names: NameDirectory) -> Result<Self> {
        let space = names.topology().shard_space().unwrap_or(u64::MAX);
        let shards = TieredCache::new(config.shard_cache_capacity(space))?;
        let values = TieredCache::new(config.value_cache_size)?;
        let metrics = Arc::new(Metrics::new());
        let shard_options = ShardOptions::from_config(&config, Some(metrics.clone()));

        tracing::info!(
            "Opened store at {:?} with {} shards{}",
            config.data_dir,
            names.len(),
            if config.readonly { " (read-only)" } else { "" }
        );

        Ok(Self {
            config,
            names,
            shards,
            values,
            shard_options,
            metrics,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        self.names.topology()
    }

    pub fn key_class(&self) -> &KeyClass {
        self.names.key_class()
    }

    pub fn is_readonly(&self) -> bool {
        self.config.readonly
    }

    /// Returns the open shard `name`, opening it if needed.
    ///
    /// Shards that were never written are only created when `create` is
    /// set; otherwise they are reported as `None`.
    fn shard(&mut self, name: &str, create: bool) -> Result<Option<&mut ShardStore>> {
        let cache_key = name.to_string();
        if self.shards.contains(&cache_key) {
            return Ok(self.shards.get_mut(&cache_key));
        }
        if !self.names.contains(name) {
            if !create {
                return Ok(None);
            }
            self.names.register(name)?;
        }

        let (index_path, data_path) = self.names.shard_paths(name)?;
        if self.config.readonly && !shard_files_exist(&index_path, &data_path) {
            // registered, but the writer stopped before creating the logs
            return Ok(None);
        }
        let shard = ShardStore::open(
            name,
            &index_path,
            &data_path,
            self.names.key_class().clone(),
            self.shard_options.clone(),
        )?;
        self.metrics.increment_shard_opens();

        if let Some((evicted, _)) = self.shards.insert(cache_key.clone(), shard) {
            tracing::debug!("Closed shard {:?} to make room for {:?}", evicted, name);
        }
        Ok(self.shards.peek_mut(&cache_key))
    }

    fn check_writable(&self) -> Result<()> {
        if self.config.readonly {
            Err(StorageError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Whether `key` holds a value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the key class rejects `key`.
    pub fn contains(&mut self, key: &str) -> Result<bool> {
        let name = self.names.name_of(key)?;
        if self.values.contains(&key.to_string()) {
            return Ok(true);
        }
        match self.shard(name, false)? {
            Some(shard) => shard.contains(key),
            None => Ok(false),
        }
    }

    /// Retrieves the value stored under `key`.
    ///
    /// Cached values are returned without touching the shard; everything
    /// else is read from the data log and checksum-verified.
    ///
    /// # Returns
    ///
    /// Returns `Ok(Some(value))` if the key exists and `Ok(None)` if not.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The key class rejects `key` (`InvalidKey`)
    /// - The stored value fails its checksum (`ChecksumMismatch`)
    /// - The shard cannot be opened
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use triekv::{Config, StorageEngine};
    /// # use std::path::PathBuf;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let mut engine = StorageEngine::open_existing(Config::new(PathBuf::from("./data")))?;
    /// engine.put("abcd01", b"value")?;
    ///
    /// assert_eq!(engine.get("abcd01")?, Some(b"value".to_vec()));
    /// assert_eq!(engine.get("abcd02")?, None);
    /// # Ok(())
    /// # }
    /// ```
    pub fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let start = Instant::now();
        let name = self.names.name_of(key)?;

        let cache_key = key.to_string();
        if let Some(value) = self.values.get(&cache_key) {
            let value = value.clone();
            self.metrics.increment_cache_hit();
            self.metrics.record_latency("get", start.elapsed());
            self.metrics.increment_throughput();
            return Ok(Some(value));
        }
        self.metrics.increment_cache_miss();

        let value = match self.shard(name, false)? {
            Some(shard) => shard.get(key)?,
            None => None,
        };
        if let Some(value) = &value {
            self.values.insert(cache_key, value.clone());
        }

        self.metrics.record_latency("get", start.elapsed());
        self.metrics.increment_throughput();
        Ok(value)
    }

    /// Stores `value` under `key`.
    ///
    /// The key is validated before any I/O. Writing the value the cache
    /// already holds for `key` is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The store is read-only (`ReadOnly`)
    /// - `value` is empty (`EmptyValue`)
    /// - The key class rejects `key` (`InvalidKey`)
    /// - Appending to the shard's logs fails
    pub fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let start = Instant::now();
        self.check_writable()?;
        if value.is_empty() {
            return Err(StorageError::EmptyValue);
        }
        let name = self.names.name_of(key)?;

        let cache_key = key.to_string();
        if self.values.peek(&cache_key).map(Vec::as_slice) == Some(value) {
            return Ok(());
        }

        self.values.remove(&cache_key);
        match self.shard(name, true)? {
            Some(shard) => {
                shard.put(key, value)?;
            }
            None => return Err(StorageError::InvalidKey { key: key.to_string() }),
        }
        self.values.insert(cache_key, value.to_vec());

        self.metrics.record_latency("put", start.elapsed());
        self.metrics.increment_throughput();
        Ok(())
    }

    /// Deletes `key`. Returns `false` if it held no value.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` on a read-only store and `InvalidKey` if the key
    /// class rejects `key`.
    pub fn delete(&mut self, key: &str) -> Result<bool> {
        let start = Instant::now();
        self.check_writable()?;
        let name = self.names.name_of(key)?;

        self.values.remove(&key.to_string());
        let deleted = match self.shard(name, false)? {
            Some(shard) => shard.pop(key)?,
            None => false,
        };

        self.metrics.record_latency("delete", start.elapsed());
        self.metrics.increment_throughput();
        Ok(deleted)
    }

    /// Deletes every key starting with `prefix` and returns how many went.
    ///
    /// A prefix at least as long as a shard name trims inside one shard; a
    /// shorter one empties every discovered shard whose name it starts.
    pub fn trim(&mut self, prefix: &str) -> Result<usize> {
        self.check_writable()?;
        if !self.key_class().check_chars(prefix) {
            return Err(StorageError::InvalidKey { key: prefix.to_string() });
        }

        let name_len = self.topology().name_len();
        let targets: Vec<String> = if prefix.len() >= name_len {
            vec![prefix[..name_len].to_string()]
        } else {
            self.names
                .names()
                .filter(|name| name.starts_with(prefix))
                .map(str::to_string)
                .collect()
        };

        let mut removed = 0;
        for name in targets {
            if let Some(shard) = self.shard(&name, false)? {
                removed += shard.trim(prefix)?;
            }
        }

        for key in self.values.keys() {
            if key.starts_with(prefix) {
                self.values.remove(&key);
            }
        }

        tracing::debug!("Trimmed {} keys with prefix {:?}", removed, prefix);
        Ok(removed)
    }

    /// Iterates over every live key, shard by shard in name order.
    ///
    /// Each shard's keys are snapshotted when the iterator reaches it.
    pub fn keys(&mut self) -> Keys<'_> {
        let names: Vec<String> = self.names.names().map(str::to_string).collect();
        Keys {
            engine: self,
            names: names.into_iter(),
            current: Vec::new().into_iter(),
        }
    }

    /// Number of live keys across all discovered shards.
    pub fn len(&mut self) -> Result<usize> {
        let names: Vec<String> = self.names.names().map(str::to_string).collect();
        let mut total = 0;
        for name in names {
            if let Some(shard) = self.shard(&name, false)? {
                total += shard.len();
            }
        }
        Ok(total)
    }

    /// Forces GC on every discovered shard and returns how many were
    /// rewritten. Always 0 on a read-only store.
    pub fn force_gc(&mut self) -> Result<usize> {
        if self.config.readonly {
            return Ok(0);
        }
        let names: Vec<String> = self.names.names().map(str::to_string).collect();
        let mut compacted = 0;
        for name in names {
            if let Some(shard) = self.shard(&name, false)? {
                if shard.force_gc()? {
                    compacted += 1;
                }
            }
        }
        tracing::info!("Forced GC rewrote {} shards", compacted);
        Ok(compacted)
    }

    /// Syncs every open shard with unsynced changes.
    pub fn sync(&mut self) -> Result<()> {
        for shard in self.shards.values_mut() {
            shard.sync()?;
        }
        Ok(())
    }

    /// Syncs and closes every open shard.
    pub fn close(mut self) -> Result<()> {
        self.sync()?;
        self.shards.clear();
        Ok(())
    }

    /// Returns a reference to the metrics collector.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use triekv::{Config, StorageEngine};
    /// # use std::path::PathBuf;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut engine = StorageEngine::open_existing(Config::new(PathBuf::from("./data")))?;
    ///
    /// engine.put("abcd01", b"value")?;
    ///
    /// let (p50, p95, p99) = engine.metrics().get_percentiles("put");
    /// println!("PUT latency - p50: {}μs, p95: {}μs, p99: {}μs", p50, p95, p99);
    /// # Ok(())
    /// # }
    /// ```
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

fn shard_files_exist(index_path: &Path, data_path: &Path) -> bool {
    [index_path, data_path]
        .into_iter()
        .any(|path| path.exists() || backup_path(path).exists())
}

/// Iterator over every live key of a [`StorageEngine`].
pub struct Keys<'a> {
    engine: &'a mut StorageEngine,
    names: std::vec::IntoIter<String>,
    current: std::vec::IntoIter<String>,
}

impl Iterator for Keys<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(key) = self.current.next() {
                return Some(Ok(key));
            }
            let name = self.names.next()?;
            match self.engine.shard(&name, false) {
                Ok(Some(shard)) => {
                    self.current = shard.keys().collect::<Vec<_>>().into_iter();
                }
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
