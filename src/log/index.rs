use super::MagicFile;
use crate::entry::{IndexEntry, IndexRecord, INDEX_MAGIC, MAGIC_SIZE};
use crate::error::{Result, StorageError};
use std::path::Path;

/// Append-only log of index entries; replaying it rebuilds a shard's trie.
#[derive(Debug)]
pub struct IndexLog {
    file: MagicFile,
}

impl IndexLog {
    pub fn open(path: &Path, readonly: bool) -> Result<Self> {
        Ok(Self { file: MagicFile::open(path, &INDEX_MAGIC, readonly)? })
    }

    /// Append a record for `key`, which is relative to the shard name.
    pub fn append_put(&mut self, key: &str, record: IndexRecord) -> Result<()> {
        self.append(&IndexEntry::new_put(key, record))
    }

    /// Append a tombstone for `key`.
    pub fn append_delete(&mut self, key: &str) -> Result<()> {
        self.append(&IndexEntry::new_delete(key))
    }

    pub fn append(&mut self, entry: &IndexEntry) -> Result<()> {
        let bytes = entry.serialize()?;
        self.file.append(&bytes)?;
        Ok(())
    }

    /// Append many entries with a single write.
    pub fn append_batch<'e>(&mut self, entries: impl IntoIterator<Item = &'e IndexEntry>) -> Result<()> {
        let mut buffer = Vec::new();
        for entry in entries {
            buffer.extend_from_slice(&entry.serialize()?);
        }
        if !buffer.is_empty() {
            self.file.append(&buffer)?;
        }
        Ok(())
    }

    /// Decode every entry in log order.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedData` pointing at the first entry that fails to decode,
    /// including a torn entry at the tail.
    pub fn read_entries(&self) -> Result<Vec<IndexEntry>> {
        let body = self.file.read_body()?;
        let mut entries = Vec::new();
        let mut offset = 0;

        while offset < body.len() {
            match IndexEntry::deserialize(&body[offset..]) {
                Ok((entry, used)) => {
                    entries.push(entry);
                    offset += used;
                }
                Err(e) => {
                    tracing::debug!("Index log {:?} stops decoding: {}", self.file.path(), e);
                    return Err(StorageError::CorruptedData {
                        file: self.file.path().to_path_buf(),
                        offset: (MAGIC_SIZE + offset) as u64,
                    });
                }
            }
        }

        Ok(entries)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync()
    }

    pub fn rename(&mut self, to: &Path) -> Result<()> {
        self.file.rename(to)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
