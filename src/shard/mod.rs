//! One shard: a radix trie over an index log and a data log.

pub mod recovery;

use crate::compaction::{Compactor, GcPlan, GcStats};
use crate::config::{Config, GcConfig};
use crate::entry::{IndexEntry, IndexRecord, MAGIC_SIZE};
use crate::error::{Result, StorageError};
use crate::index::{RadixTrie, TrieConfig};
use crate::keyclass::KeyClass;
use crate::log::{backup_path, DataLog, IndexLog};
use crate::metrics::Metrics;
use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Knobs a shard is opened with.
#[derive(Clone)]
pub struct ShardOptions {
    /// Refuse every write and never run GC.
    pub readonly: bool,
    /// Sync both logs after every write (default: true).
    ///
    /// Only scratch stores built during GC turn this off; they sync once
    /// before being renamed into place.
    pub sync_writes: bool,
    pub trie: TrieConfig,
    pub gc: GcConfig,
    pub metrics: Option<Arc<Metrics>>,
}

impl Default for ShardOptions {
    fn default() -> Self {
        Self {
            readonly: false,
            sync_writes: true,
            trie: TrieConfig::default(),
            gc: GcConfig::default(),
            metrics: None,
        }
    }
}

impl ShardOptions {
    pub fn from_config(config: &Config, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            readonly: config.readonly,
            sync_writes: true,
            trie: config.trie,
            gc: config.gc,
            metrics,
        }
    }
}

/// Persistent store for every key starting with the shard name.
///
/// Values are appended to the data log, and an index record pointing at
/// them is appended to the index log. The trie is rebuilt from the index log
/// on open. Overwritten and deleted keys leave dead records behind until
/// GC rewrites the logs.
///
/// # Example
///
/// ```no_run
/// use triekv::keyclass::KeyClass;
/// use triekv::shard::{ShardOptions, ShardStore};
/// use std::path::Path;
///
/// let mut shard = ShardStore::open(
///     "ab",
///     Path::new("/tmp/ab.idx"),
///     Path::new("/tmp/ab.dat"),
///     KeyClass::hex(),
///     ShardOptions::default(),
/// )?;
/// shard.put("ab01", b"value")?;
/// assert_eq!(shard.get("ab01")?, Some(b"value".to_vec()));
/// # Ok::<(), triekv::StorageError>(())
/// ```
pub struct ShardStore {
    name: String,
    index_path: PathBuf,
    data_path: PathBuf,
    trie: RadixTrie<IndexRecord>,
    index_log: IndexLog,
    data_log: DataLog,
    /// Index records in the current log, tombstones included.
    records: u64,
    compactor: Compactor,
    options: ShardOptions,
}

impl ShardStore {
    /// Opens the shard `name` backed by the two given files.
    ///
    /// Crash recovery runs first, then missing logs are created (unless
    /// read-only), the index log is replayed into a fresh trie, and a
    /// non-forced GC pass runs on writable stores.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Recovery cannot find a consistent index/data pair (`RecoveryFailed`)
    /// - A log has a bad magic tag or a torn entry (`CorruptedData`)
    /// - The index log deletes a key it never inserted (`CorruptedData`)
    /// - A read-only open finds no files (`IoError`)
    pub fn open(
        name: &str,
        index_path: &Path,
        data_path: &Path,
        key_class: KeyClass,
        options: ShardOptions,
    ) -> Result<Self> {
        recovery::restore(index_path, data_path)?;

        let index_log = IndexLog::open(index_path, options.readonly)?;
        let data_log = DataLog::open(data_path, options.readonly)?;
        let trie = RadixTrie::with_config(name, key_class, options.trie)?;

        let mut store = Self {
            name: name.to_string(),
            index_path: index_path.to_path_buf(),
            data_path: data_path.to_path_buf(),
            trie,
            index_log,
            data_log,
            records: 0,
            compactor: Compactor::new(options.gc),
            options,
        };
        store.replay()?;

        tracing::debug!(
            "Opened shard {:?} with {} keys from {} records",
            store.name,
            store.trie.len(),
            store.records
        );

        if !store.options.readonly {
            store.gc(false)?;
        }
        Ok(store)
    }

    fn replay(&mut self) -> Result<()> {
        let mut offset = MAGIC_SIZE as u64;
        for entry in self.index_log.read_entries()? {
            let key = format!("{}{}", self.name, entry.key);
            match entry.record {
                Some(record) => {
                    self.trie.put(&key, record)?;
                }
                None => {
                    if !self.trie.pop(&key)? {
                        return Err(StorageError::CorruptedData {
                            file: self.index_path.clone(),
                            offset,
                        });
                    }
                }
            }
            offset += entry.serialized_size() as u64;
            self.records += 1;
        }
        self.trie.mark_clean();
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn is_readonly(&self) -> bool {
        self.options.readonly
    }

    pub fn key_class(&self) -> &KeyClass {
        self.trie.key_class()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    /// Index records written since the last rewrite, tombstones included.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        self.trie.contains(key)
    }

    /// Reads and verifies the value of `key`.
    ///
    /// # Errors
    ///
    /// Returns `ChecksumMismatch` or `CorruptedData` when the data log does
    /// not hold what the index record describes, and `KeyOutOfRange` for a
    /// key outside this shard.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let record = match self.trie.get(key)? {
            Some(record) => *record,
            None => return Ok(None),
        };
        match self.data_log.read(&record) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::error!(
                    "Shard {:?} failed to read {:?} at offset {}: {}",
                    self.name,
                    key,
                    record.offset,
                    e
                );
                Err(e)
            }
        }
    }

    /// Stores `value` under `key`. Returns `true` if the key is new.
    ///
    /// The key is validated before anything is written.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly`, `EmptyValue`, `InvalidKey` or `KeyOutOfRange`
    /// for caller mistakes and `IoError` if an append fails.
    pub fn put(&mut self, key: &str, value: &[u8]) -> Result<bool> {
        self.check_writable()?;
        if value.is_empty() {
            return Err(StorageError::EmptyValue);
        }
        self.trie.key_class().validate(key)?;
        let nick = self.trie.nick(key)?;

        let record = self.data_log.append(value)?;
        self.index_log.append_put(nick, record)?;
        let inserted = self.trie.put(key, record)?;
        self.records += 1;
        self.flush()?;
        Ok(inserted)
    }

    /// Deletes `key`. Returns `false` if it was absent, in which case
    /// nothing is written.
    pub fn pop(&mut self, key: &str) -> Result<bool> {
        self.check_writable()?;
        let nick = self.trie.nick(key)?;
        if !self.trie.pop(key)? {
            return Ok(false);
        }
        self.index_log.append_delete(nick)?;
        self.records += 1;
        self.flush()?;
        Ok(true)
    }

    /// Deletes every key starting with `prefix`, writing one tombstone per
    /// key, and returns how many were removed.
    ///
    /// A prefix of the shard name removes everything.
    pub fn trim(&mut self, prefix: &str) -> Result<usize> {
        self.check_writable()?;
        let doomed: Vec<String> = self.trie.keys().filter(|key| key.starts_with(prefix)).collect();
        let removed = self.trie.trim(prefix)?;
        if removed == 0 {
            return Ok(0);
        }

        let tombstones = doomed
            .iter()
            .map(|key| self.trie.nick(key).map(IndexEntry::new_delete))
            .collect::<Result<Vec<_>>>()?;
        self.index_log.append_batch(&tombstones)?;
        self.records += tombstones.len() as u64;
        self.flush()?;

        tracing::debug!("Trimmed {} keys with prefix {:?} from shard {:?}", removed, prefix, self.name);
        Ok(removed)
    }

    /// Live keys in iteration order.
    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.trie.keys()
    }

    /// Current dead-space accounting.
    pub fn stats(&self) -> GcStats {
        GcStats {
            records: self.records,
            live: self.trie.len() as u64,
            data_size: self.data_log.size(),
            live_bytes: self.trie.iter().map(|(_, record)| record.length as u64).sum(),
        }
    }

    /// Rewrites the logs if there is any dead record at all. Always `false`
    /// on a read-only store.
    pub fn force_gc(&mut self) -> Result<bool> {
        if self.options.readonly {
            return Ok(false);
        }
        self.gc(true)
    }

    fn gc(&mut self, force: bool) -> Result<bool> {
        let stats = self.stats();
        let plan = match self.compactor.plan(&stats, force) {
            Some(plan) => plan,
            None => return Ok(false),
        };

        for path in [&self.index_path, &self.data_path] {
            let backup = backup_path(path);
            if backup.exists() {
                return Err(StorageError::BackupExists { path: backup });
            }
        }

        let parent = self.index_path.parent().unwrap_or_else(|| Path::new("."));
        let scratch = tempfile::Builder::new().prefix(".gc-").tempdir_in(parent)?;
        match plan {
            GcPlan::IndexOnly => self.rewrite_index(scratch.path())?,
            GcPlan::Full => self.rewrite_all(scratch.path())?,
        }

        if let Some(metrics) = &self.options.metrics {
            metrics.increment_gc_runs();
        }
        tracing::info!(
            "GC ({:?}) of shard {:?}: {} records down to {}, {} data bytes down to {}",
            plan,
            self.name,
            stats.records,
            self.records,
            stats.data_size,
            self.data_log.size()
        );
        Ok(true)
    }

    fn rewrite_index(&mut self, scratch: &Path) -> Result<()> {
        let mut entries = Vec::with_capacity(self.trie.len());
        for (key, record) in self.trie.iter() {
            entries.push(IndexEntry::new_put(self.trie.nick(&key)?, *record));
        }

        let mut fresh = IndexLog::open(&scratch.join("index"), false)?;
        fresh.append_batch(&entries)?;
        fresh.sync()?;

        let index_bak = backup_path(&self.index_path);
        self.index_log.rename(&index_bak)?;
        fresh.rename(&self.index_path)?;
        mem::swap(&mut self.index_log, &mut fresh);
        drop(fresh);
        fs::remove_file(&index_bak)?;

        self.records = entries.len() as u64;
        Ok(())
    }

    fn rewrite_all(&mut self, scratch: &Path) -> Result<()> {
        let options = ShardOptions {
            readonly: false,
            sync_writes: false,
            metrics: None,
            ..self.options.clone()
        };
        let mut fresh = ShardStore::open(
            &self.name,
            &scratch.join("index"),
            &scratch.join("data"),
            self.trie.key_class().clone(),
            options,
        )?;
        for (key, record) in self.trie.iter() {
            let value = self.data_log.read(record)?;
            fresh.put(&key, &value)?;
        }
        fresh.sync()?;

        let index_bak = backup_path(&self.index_path);
        let data_bak = backup_path(&self.data_path);
        self.index_log.rename(&index_bak)?;
        self.data_log.rename(&data_bak)?;
        fresh.index_log.rename(&self.index_path)?;
        fresh.data_log.rename(&self.data_path)?;

        mem::swap(&mut self.index_log, &mut fresh.index_log);
        mem::swap(&mut self.data_log, &mut fresh.data_log);
        mem::swap(&mut self.trie, &mut fresh.trie);
        self.records = fresh.records;
        drop(fresh);

        fs::remove_file(&index_bak)?;
        fs::remove_file(&data_bak)?;
        Ok(())
    }

    /// Syncs both logs if anything changed since open or the last sync.
    pub fn sync(&mut self) -> Result<()> {
        if !self.trie.is_modified() {
            return Ok(());
        }
        self.index_log.sync()?;
        self.data_log.sync()?;
        self.note_fsyncs(2);
        self.trie.mark_clean();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.options.sync_writes {
            self.data_log.sync()?;
            self.index_log.sync()?;
            self.note_fsyncs(2);
        }
        Ok(())
    }

    fn note_fsyncs(&self, n: usize) {
        if let Some(metrics) = &self.options.metrics {
            for _ in 0..n {
                metrics.increment_fsync();
            }
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.options.readonly {
            Err(StorageError::ReadOnly)
        } else {
            Ok(())
        }
    }
}

impl Drop for ShardStore {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            tracing::warn!("Failed to sync shard {:?} on close: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_shard(dir: &Path, name: &str, options: ShardOptions) -> Result<ShardStore> {
        ShardStore::open(
            name,
            &dir.join(format!("{}.idx", name)),
            &dir.join(format!("{}.dat", name)),
            KeyClass::hex(),
            options,
        )
    }

    fn small_gc() -> ShardOptions {
        ShardOptions {
            gc: GcConfig { index_min_dead: 4, index_max_dead: 8, ..GcConfig::default() },
            ..ShardOptions::default()
        }
    }

    #[test]
    fn test_put_get_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut shard = open_shard(temp_dir.path(), "ab", ShardOptions::default()).unwrap();
            assert!(shard.put("ab01", b"one").unwrap());
            assert!(shard.put("ab02", b"two").unwrap());
            assert!(!shard.put("ab01", b"uno").unwrap());
            assert_eq!(shard.records(), 3);
        }

        let shard = open_shard(temp_dir.path(), "ab", ShardOptions::default()).unwrap();
        assert_eq!(shard.len(), 2);
        assert_eq!(shard.records(), 3);
        assert_eq!(shard.get("ab01").unwrap(), Some(b"uno".to_vec()));
        assert_eq!(shard.get("ab02").unwrap(), Some(b"two".to_vec()));
        assert_eq!(shard.get("ab03").unwrap(), None);
    }

    #[test]
    fn test_key_equal_to_shard_name() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut shard = open_shard(temp_dir.path(), "ab", ShardOptions::default()).unwrap();
            shard.put("ab", b"root").unwrap();
        }
        let shard = open_shard(temp_dir.path(), "ab", ShardOptions::default()).unwrap();
        assert_eq!(shard.get("ab").unwrap(), Some(b"root".to_vec()));
    }

    #[test]
    fn test_rejects_bad_input_before_writing() {
        let temp_dir = TempDir::new().unwrap();
        let mut shard = open_shard(temp_dir.path(), "ab", ShardOptions::default()).unwrap();

        assert!(matches!(shard.put("ab01", b""), Err(StorageError::EmptyValue)));
        assert!(matches!(shard.put("abzz", b"x"), Err(StorageError::InvalidKey { .. })));
        assert!(matches!(shard.put("cd01", b"x"), Err(StorageError::KeyOutOfRange { .. })));
        assert_eq!(shard.records(), 0);
        assert_eq!(shard.stats().data_size, 0);
    }

    #[test]
    fn test_pop_writes_tombstone() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut shard = open_shard(temp_dir.path(), "ab", ShardOptions::default()).unwrap();
            shard.put("ab01", b"one").unwrap();
            assert!(shard.pop("ab01").unwrap());
            assert!(!shard.pop("ab01").unwrap());
            assert_eq!(shard.records(), 2);
        }

        let shard = open_shard(temp_dir.path(), "ab", ShardOptions::default()).unwrap();
        assert!(shard.is_empty());
        assert_eq!(shard.records(), 2);
    }

    #[test]
    fn test_trim_persists() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut shard = open_shard(temp_dir.path(), "ab", ShardOptions::default()).unwrap();
            for key in ["ab10", "ab11", "ab12", "ab20"] {
                shard.put(key, key.as_bytes()).unwrap();
            }
            assert_eq!(shard.trim("ab1").unwrap(), 3);
            assert_eq!(shard.trim("ab1").unwrap(), 0);
        }

        let mut shard = open_shard(temp_dir.path(), "ab", ShardOptions::default()).unwrap();
        assert_eq!(shard.keys().collect::<Vec<_>>(), vec!["ab20".to_string()]);
        assert_eq!(shard.trim("a").unwrap(), 1);
        assert!(shard.is_empty());
        assert!(shard.trim("cd").is_err());
    }

    #[test]
    fn test_readonly() {
        let temp_dir = TempDir::new().unwrap();
        let readonly = ShardOptions { readonly: true, ..ShardOptions::default() };
        assert!(open_shard(temp_dir.path(), "ab", readonly.clone()).is_err());

        {
            let mut shard = open_shard(temp_dir.path(), "ab", ShardOptions::default()).unwrap();
            shard.put("ab01", b"one").unwrap();
            shard.put("ab01", b"two").unwrap();
        }

        let mut shard = open_shard(temp_dir.path(), "ab", readonly).unwrap();
        assert!(shard.is_readonly());
        assert_eq!(shard.get("ab01").unwrap(), Some(b"two".to_vec()));
        assert!(matches!(shard.put("ab02", b"x"), Err(StorageError::ReadOnly)));
        assert!(matches!(shard.pop("ab01"), Err(StorageError::ReadOnly)));
        assert!(matches!(shard.trim("ab"), Err(StorageError::ReadOnly)));
        assert!(!shard.force_gc().unwrap());
    }

    #[test]
    fn test_get_detects_corrupted_value() {
        let temp_dir = TempDir::new().unwrap();
        let data_path = temp_dir.path().join("ab.dat");
        {
            let mut shard = open_shard(temp_dir.path(), "ab", ShardOptions::default()).unwrap();
            shard.put("ab01", b"payload").unwrap();
        }

        let mut bytes = fs::read(&data_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&data_path, &bytes).unwrap();

        let shard = open_shard(temp_dir.path(), "ab", ShardOptions::default()).unwrap();
        assert!(matches!(shard.get("ab01"), Err(StorageError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_force_gc_rewrites_both_logs() {
        let temp_dir = TempDir::new().unwrap();
        let mut shard = open_shard(temp_dir.path(), "ab", ShardOptions::default()).unwrap();
        assert!(!shard.force_gc().unwrap());

        shard.put("ab01", b"one").unwrap();
        shard.put("ab02", b"two").unwrap();
        shard.pop("ab02").unwrap();
        let data_size = shard.stats().data_size;

        assert!(shard.force_gc().unwrap());
        assert_eq!(shard.records(), 1);
        // forced GC always rewrites the data log too
        assert!(shard.stats().data_size < data_size);
        assert_eq!(shard.get("ab01").unwrap(), Some(b"one".to_vec()));
        assert!(!backup_path(shard.index_path()).exists());
        assert!(!backup_path(shard.data_path()).exists());
    }

    #[test]
    fn test_gc_on_open_rewrites_index() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut shard = open_shard(temp_dir.path(), "ab", ShardOptions::default()).unwrap();
            shard.put("ab01", b"keep").unwrap();
            for _ in 0..10 {
                shard.put("ab02", b"churn").unwrap();
                shard.pop("ab02").unwrap();
            }
            assert_eq!(shard.records(), 21);
        }

        let shard = open_shard(temp_dir.path(), "ab", small_gc()).unwrap();
        assert_eq!(shard.records(), 1);
        assert_eq!(shard.get("ab01").unwrap(), Some(b"keep".to_vec()));

        drop(shard);
        let shard = open_shard(temp_dir.path(), "ab", ShardOptions::default()).unwrap();
        assert_eq!(shard.records(), 1);
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn test_gc_refuses_existing_backup() {
        let temp_dir = TempDir::new().unwrap();
        let mut shard = open_shard(temp_dir.path(), "ab", ShardOptions::default()).unwrap();
        shard.put("ab01", b"one").unwrap();
        shard.put("ab01", b"two").unwrap();

        fs::write(backup_path(shard.index_path()), b"stale").unwrap();
        assert!(matches!(shard.force_gc(), Err(StorageError::BackupExists { .. })));
    }

    #[test]
    fn test_metrics_count_fsyncs_and_gc() {
        let temp_dir = TempDir::new().unwrap();
        let metrics = Arc::new(Metrics::new());
        let options = ShardOptions { metrics: Some(metrics.clone()), ..ShardOptions::default() };
        let mut shard = open_shard(temp_dir.path(), "ab", options).unwrap();

        shard.put("ab01", b"one").unwrap();
        shard.put("ab01", b"two").unwrap();
        shard.force_gc().unwrap();

        let report = metrics.report();
        assert_eq!(report.fsync_count, 4);
        assert_eq!(report.gc_runs, 1);
    }
}
