use super::MagicFile;
use crate::entry::{IndexRecord, DATA_MAGIC};
use crate::error::Result;
use std::path::Path;

/// Append-only sequence of raw values addressed by index records.
#[derive(Debug)]
pub struct DataLog {
    file: MagicFile,
}

impl DataLog {
    pub fn open(path: &Path, readonly: bool) -> Result<Self> {
        Ok(Self { file: MagicFile::open(path, &DATA_MAGIC, readonly)? })
    }

    /// Append `value`, returning the record that addresses it. Durability is
    /// up to the caller's [`sync`](Self::sync).
    pub fn append(&mut self, value: &[u8]) -> Result<IndexRecord> {
        let offset = self.file.end();
        let record = IndexRecord::new(offset, value)?;
        self.file.append(value)?;
        Ok(record)
    }

    /// Read the bytes addressed by `record` without verifying them.
    pub fn read_raw(&self, record: &IndexRecord) -> Result<Vec<u8>> {
        self.file.read_at(record.offset, record.length as usize)
    }

    /// Read the bytes addressed by `record` and check their CRC32.
    pub fn read(&self, record: &IndexRecord) -> Result<Vec<u8>> {
        let value = self.read_raw(record)?;
        record.verify(&value)?;
        Ok(value)
    }

    /// Physical size of the value area, dead bytes included.
    pub fn size(&self) -> u64 {
        self.file.body_len()
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use tempfile::TempDir;

    #[test]
    fn test_append_returns_record() {
        let temp_dir = TempDir::new().unwrap();
        let mut log = DataLog::open(&temp_dir.path().join("s.dat"), false).unwrap();

        let first = log.append(b"alpha").unwrap();
        let second = log.append(b"beta").unwrap();
        assert_eq!(first.offset, 8);
        assert_eq!(second.offset, 13);
        assert_eq!(log.size(), 9);
        assert_eq!(log.read(&second).unwrap(), b"beta");
    }

    #[test]
    fn test_read_detects_flipped_byte() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("s.dat");
        let record = {
            let mut log = DataLog::open(&path, false).unwrap();
            log.append(b"payload").unwrap()
        };

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[record.offset as usize] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let log = DataLog::open(&path, true).unwrap();
        assert!(matches!(log.read(&record), Err(StorageError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_record_past_end() {
        let temp_dir = TempDir::new().unwrap();
        let mut log = DataLog::open(&temp_dir.path().join("s.dat"), false).unwrap();
        let mut record = log.append(b"short").unwrap();
        record.length = 64;
        assert!(matches!(log.read(&record), Err(StorageError::CorruptedData { .. })));
    }
}
