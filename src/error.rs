//! Error types for triekv.
//!
//! This module defines all error types that can occur during storage operations.
//! Expected misses (an absent key on get or delete) are never errors; they are
//! reported as `Ok(None)` or `Ok(false)` by the operations themselves.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for triekv operations.
///
/// This is a convenience alias for `Result<T, StorageError>`.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error types for storage operations.
///
/// Variants fall into three groups: caller contract violations (bad keys,
/// writes to a read-only store), data integrity failures (checksum mismatch,
/// unrecoverable shard files) and plain I/O or serialization plumbing.
/// None of them are retried internally.
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the operating system.
    ///
    /// This includes file system errors, permission errors, and device errors.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Data corruption detected in a file.
    ///
    /// Raised when a log cannot be parsed: a bad magic header, a truncated
    /// entry, or a record pointing outside its data file.
    #[error("Corrupted data in file {file:?} at offset {offset}")]
    CorruptedData {
        /// Path to the file containing corrupted data
        file: PathBuf,
        /// Byte offset where corruption was detected
        offset: u64
    },

    /// Checksum verification failed.
    ///
    /// The bytes read from a data log do not match the CRC32 stored in
    /// their index record.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Expected checksum value
        expected: u32,
        /// Actual checksum value computed from data
        actual: u32
    },

    /// Key rejected by the configured key class.
    #[error("Invalid key: {key:?}")]
    InvalidKey {
        /// The rejected key
        key: String
    },

    /// Key does not belong to the subtree it was routed to.
    #[error("Key {key:?} is outside of prefix {prefix:?}")]
    KeyOutOfRange {
        /// The offending key
        key: String,
        /// Prefix required by the trie node
        prefix: String
    },

    /// Values must be at least one byte long.
    #[error("Empty values cannot be stored")]
    EmptyValue,

    /// A mutating operation was issued against a read-only store.
    #[error("Store is opened read-only")]
    ReadOnly,

    /// A backup file left by an earlier compaction is still on disk.
    ///
    /// Compaction refuses to run until recovery has resolved it.
    #[error("Backup file already exists: {path:?}")]
    BackupExists {
        /// Path of the stale backup
        path: PathBuf
    },

    /// No consistent index/data pair could be found while opening a shard.
    #[error("Unrecoverable shard: index {index:?}, data {data:?}")]
    RecoveryFailed {
        /// Index log path
        index: PathBuf,
        /// Data log path
        data: PathBuf
    },

    /// Persisted shard topology differs from the requested one.
    #[error("Topology mismatch: {0}")]
    TopologyMismatch(String),

    /// A name directory already exists at this location.
    #[error("Store already initialized at {path:?}")]
    AlreadyInitialized {
        /// Name directory path
        path: PathBuf
    },

    /// No name directory exists at this location.
    #[error("Store not initialized at {path:?}")]
    NotInitialized {
        /// Expected name directory path
        path: PathBuf
    },

    /// Configuration validation failed.
    ///
    /// This error occurs when invalid configuration parameters are provided.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization or deserialization failed.
    ///
    /// This error occurs when converting data structures to/from bytes.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// JSON parsing or serialization failed.
    ///
    /// This error occurs when reading or writing configuration files.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl StorageError {
    /// True for failures that signal damaged on-disk state.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StorageError::CorruptedData { .. }
                | StorageError::ChecksumMismatch { .. }
                | StorageError::RecoveryFailed { .. }
        )
    }
}
