//! Restoring a consistent index/data pair after an interrupted GC.
//!
//! GC moves each primary log aside to its `.bak` sibling before renaming
//! the rewritten log into place, and deletes the backups last. Whatever
//! point a crash hits, some combination of primaries and backups on disk is
//! a consistent pair; [`restore`] finds it and removes the rest.

use crate::error::{Result, StorageError};
use crate::log::{backup_path, DataLog, IndexLog};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Bring the shard files at `index_path`/`data_path` back to a consistent
/// pair with no backups left.
///
/// # Errors
///
/// Returns `RecoveryFailed` when no combination of primaries and backups
/// is consistent. Filesystem failures are returned as `IoError`.
pub fn restore(index_path: &Path, data_path: &Path) -> Result<()> {
    let index_bak = backup_path(index_path);
    let data_bak = backup_path(data_path);
    if !index_bak.exists() && !data_bak.exists() {
        return Ok(());
    }

    tracing::warn!("Interrupted GC detected for {:?}, restoring", index_path);

    promote_if_missing(index_path, &index_bak)?;
    promote_if_missing(data_path, &data_bak)?;

    if index_bak.exists() && !check_index(index_path, &index_bak) {
        tracing::warn!("Index {:?} lost keys, falling back to its backup", index_path);
        replace(&index_bak, index_path)?;
    }

    if check_datas(index_path, data_path) {
        remove_if_exists(&index_bak)?;
        remove_if_exists(&data_bak)?;
    } else if data_bak.exists() && check_datas(index_path, &data_bak) {
        remove_if_exists(&index_bak)?;
        replace(&data_bak, data_path)?;
    } else if index_bak.exists() && check_datas(&index_bak, data_path) {
        remove_if_exists(&data_bak)?;
        replace(&index_bak, index_path)?;
    } else if index_bak.exists() && data_bak.exists() && check_datas(&index_bak, &data_bak) {
        replace(&index_bak, index_path)?;
        replace(&data_bak, data_path)?;
    }

    if index_bak.exists() || data_bak.exists() || !check_datas(index_path, data_path) {
        return Err(StorageError::RecoveryFailed {
            index: index_path.to_path_buf(),
            data: data_path.to_path_buf(),
        });
    }

    tracing::info!("Restored {:?} and {:?}", index_path, data_path);
    Ok(())
}

fn promote_if_missing(primary: &Path, backup: &Path) -> Result<()> {
    if !primary.exists() && backup.exists() {
        tracing::info!("Promoting backup {:?}", backup);
        fs::rename(backup, primary)?;
    }
    Ok(())
}

fn replace(from: &Path, to: &Path) -> Result<()> {
    tracing::warn!("Replacing {:?} with {:?}", to, from);
    remove_if_exists(to)?;
    fs::rename(from, to)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn live_keys(path: &Path) -> Result<BTreeSet<String>> {
    let log = IndexLog::open(path, true)?;
    let mut keys = BTreeSet::new();
    for entry in log.read_entries()? {
        if entry.is_tombstone() {
            if !keys.remove(&entry.key) {
                return Err(StorageError::CorruptedData {
                    file: path.to_path_buf(),
                    offset: 0,
                });
            }
        } else {
            keys.insert(entry.key);
        }
    }
    Ok(keys)
}

/// Whether a rewritten index at `index_path` holds exactly the live keys of
/// `backup_path`, with no tombstones.
///
/// Only keys are compared: a full GC moves every value, so record offsets
/// legitimately differ between the two.
pub fn check_index(index_path: &Path, backup_path: &Path) -> bool {
    let result = (|| -> Result<bool> {
        let mut expected = live_keys(backup_path)?;
        let log = IndexLog::open(index_path, true)?;
        for entry in log.read_entries()? {
            if entry.is_tombstone() || !expected.remove(&entry.key) {
                return Ok(false);
            }
        }
        Ok(expected.is_empty())
    })();

    result.unwrap_or_else(|e| {
        tracing::debug!("Index check of {:?} failed: {}", index_path, e);
        false
    })
}

/// Whether every record of the index at `index_path` addresses a value in
/// `data_path` that matches its checksum, and every tombstone deletes a key
/// that exists.
pub fn check_datas(index_path: &Path, data_path: &Path) -> bool {
    let result = (|| -> Result<bool> {
        let index = IndexLog::open(index_path, true)?;
        let data = DataLog::open(data_path, true)?;
        let mut keys = BTreeSet::new();
        for entry in index.read_entries()? {
            match entry.record {
                Some(record) => {
                    data.read(&record)?;
                    keys.insert(entry.key);
                }
                None => {
                    if !keys.remove(&entry.key) {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    })();

    result.unwrap_or_else(|e| {
        tracing::debug!("Consistency check of {:?} against {:?} failed: {}", index_path, data_path, e);
        false
    })
}
