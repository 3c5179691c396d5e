//! Magic-tagged append-only files backing every shard.
//!
//! A shard owns an [`IndexLog`] (key records and tombstones) and a
//! [`DataLog`] (raw value bytes). Both sit on top of [`MagicFile`], which
//! checks the 8 byte tag on open and only ever appends.

mod data;
mod index;

pub use data::DataLog;
pub use index::IndexLog;

use crate::entry::MAGIC_SIZE;
use crate::error::{Result, StorageError};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Suffix appended to a file path to name its backup.
pub const BACKUP_SUFFIX: &str = ".bak";

/// Path of the backup sibling of `path`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// An append-only file whose first bytes are a fixed magic tag.
#[derive(Debug)]
pub struct MagicFile {
    /// Path to the file
    path: PathBuf,
    /// File handle
    file: File,
    /// Offset one past the last byte written
    end: u64,
    /// Whether appends are refused
    readonly: bool,
}

impl MagicFile {
    /// Open `path`, creating it with `magic` when it is missing and the
    /// handle is writable.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedData` if the file is shorter than its tag or the tag
    /// differs from `magic`, and `IoError` if a read-only open finds no file.
    pub fn open(path: &Path, magic: &[u8; MAGIC_SIZE], readonly: bool) -> Result<Self> {
        let file = if readonly {
            File::open(path)?
        } else if path.exists() {
            OpenOptions::new().read(true).append(true).open(path)?
        } else {
            let mut file = OpenOptions::new()
                .read(true)
                .append(true)
                .create_new(true)
                .open(path)?;
            file.write_all(magic)?;
            file.sync_all()?;
            file
        };

        let end = file.metadata()?.len();
        let corrupted = || StorageError::CorruptedData { file: path.to_path_buf(), offset: 0 };
        if end < MAGIC_SIZE as u64 {
            return Err(corrupted());
        }
        let mut header = [0u8; MAGIC_SIZE];
        file.read_exact_at(&mut header, 0)?;
        if &header != magic {
            return Err(corrupted());
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            end,
            readonly,
        })
    }

    /// Append `data`, returning the offset it was written at.
    ///
    /// Bytes past the known end, left by an earlier failed write, are cut
    /// off first; a failed write is cut off before returning its error.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedData` if the file shrank below the known end.
    pub fn append(&mut self, data: &[u8]) -> Result<u64> {
        if self.readonly {
            return Err(StorageError::ReadOnly);
        }
        let actual = self.file.metadata()?.len();
        if actual < self.end {
            return Err(StorageError::CorruptedData {
                file: self.path.clone(),
                offset: actual,
            });
        }
        if actual > self.end {
            tracing::warn!(
                "Dropping {} stray bytes at the end of {:?}",
                actual - self.end,
                self.path
            );
            self.file.set_len(self.end)?;
        }

        let offset = self.end;
        if let Err(e) = self.file.write_all(data) {
            if let Err(cut) = self.file.set_len(offset) {
                tracing::error!("Failed to cut torn append off {:?}: {}", self.path, cut);
            }
            return Err(e.into());
        }
        self.end += data.len() as u64;
        Ok(offset)
    }

    /// Read exactly `len` bytes at `offset`, which must lie past the tag and
    /// before the end of the file.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let past_end = offset.checked_add(len as u64).map_or(true, |end| end > self.end);
        if offset < MAGIC_SIZE as u64 || past_end {
            return Err(StorageError::CorruptedData {
                file: self.path.clone(),
                offset,
            });
        }
        let mut buffer = vec![0u8; len];
        self.file.read_exact_at(&mut buffer, offset)?;
        Ok(buffer)
    }

    /// Everything after the magic tag.
    pub fn read_body(&self) -> Result<Vec<u8>> {
        self.read_at(MAGIC_SIZE as u64, (self.end - MAGIC_SIZE as u64) as usize)
    }

    /// Force written data to disk.
    pub fn sync(&mut self) -> Result<()> {
        if !self.readonly {
            self.file.flush()?;
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Move the file on disk; the handle stays valid and follows it.
    pub fn rename(&mut self, to: &Path) -> Result<()> {
        std::fs::rename(&self.path, to)?;
        self.path = to.to_path_buf();
        Ok(())
    }

    /// Number of bytes after the tag.
    pub fn body_len(&self) -> u64 {
        self.end - MAGIC_SIZE as u64
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{DATA_MAGIC, INDEX_MAGIC};
    use tempfile::TempDir;

    #[test]
    fn test_create_writes_magic() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shard.dat");

        let file = MagicFile::open(&path, &DATA_MAGIC, false).unwrap();
        assert_eq!(file.end(), MAGIC_SIZE as u64);
        assert_eq!(file.body_len(), 0);
        assert_eq!(std::fs::read(&path).unwrap(), DATA_MAGIC.to_vec());
    }

    #[test]
    fn test_wrong_magic_is_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shard.idx");
        MagicFile::open(&path, &DATA_MAGIC, false).unwrap();

        match MagicFile::open(&path, &INDEX_MAGIC, false) {
            Err(StorageError::CorruptedData { offset, .. }) => assert_eq!(offset, 0),
            other => panic!("Expected CorruptedData, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_header_is_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("short.dat");
        std::fs::write(&path, &DATA_MAGIC[..3]).unwrap();

        assert!(MagicFile::open(&path, &DATA_MAGIC, true).is_err());
    }

    #[test]
    fn test_append_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shard.dat");

        {
            let mut file = MagicFile::open(&path, &DATA_MAGIC, false).unwrap();
            assert_eq!(file.append(b"hello").unwrap(), 8);
            assert_eq!(file.append(b"world").unwrap(), 13);
            file.sync().unwrap();
        }

        let file = MagicFile::open(&path, &DATA_MAGIC, true).unwrap();
        assert_eq!(file.read_at(13, 5).unwrap(), b"world");
        assert_eq!(file.read_body().unwrap(), b"helloworld");
        assert!(file.read_at(14, 5).is_err());
        assert!(file.read_at(0, 4).is_err());
    }

    #[test]
    fn test_readonly_refuses_append_and_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shard.dat");
        assert!(MagicFile::open(&path, &DATA_MAGIC, true).is_err());

        MagicFile::open(&path, &DATA_MAGIC, false).unwrap();
        let mut file = MagicFile::open(&path, &DATA_MAGIC, true).unwrap();
        assert!(matches!(file.append(b"x"), Err(StorageError::ReadOnly)));
    }

    #[test]
    fn test_rename_follows_handle() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shard.dat");
        let bak = backup_path(&path);
        assert_eq!(bak, temp_dir.path().join("shard.dat.bak"));

        let mut file = MagicFile::open(&path, &DATA_MAGIC, false).unwrap();
        file.rename(&bak).unwrap();
        assert!(!path.exists());
        assert!(bak.exists());
        assert_eq!(file.path(), bak.as_path());

        file.append(b"after").unwrap();
        assert_eq!(file.read_at(8, 5).unwrap(), b"after");
    }

    #[test]
    fn test_stray_tail_is_cut_before_append() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shard.dat");

        let mut file = MagicFile::open(&path, &DATA_MAGIC, false).unwrap();
        assert_eq!(file.append(b"first").unwrap(), 8);

        // leftovers of a write that failed half way
        let mut other = OpenOptions::new().append(true).open(&path).unwrap();
        other.write_all(b"torn").unwrap();

        assert_eq!(file.append(b"second").unwrap(), 13);
        assert_eq!(file.read_at(13, 6).unwrap(), b"second");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 19);
        assert_eq!(file.end(), 19);
    }

    #[test]
    fn test_shrunk_file_refuses_append() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shard.dat");

        let mut file = MagicFile::open(&path, &DATA_MAGIC, false).unwrap();
        file.append(b"value").unwrap();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(10).unwrap();

        match file.append(b"next") {
            Err(StorageError::CorruptedData { offset, .. }) => assert_eq!(offset, 10),
            other => panic!("Expected CorruptedData, got {:?}", other),
        }
    }
}
