//! # triekv - Sharded Trie Key-Value Storage
//!
//! triekv is an embedded key-value store for string keys drawn from a fixed
//! alphabet. Keys are spread over many small shards by their leading
//! characters; each shard keeps an in-memory radix trie over an append-only
//! pair of log files.
//!
//! ## Architecture
//!
//! - **Key classes**: every key is validated against an alphabet and length limit
//! - **Name directory**: records the shard partition and every shard created so far
//! - **Shards**: an index log and a data log per shard, CRC32-protected,
//!   replayed into a radix trie on open and compacted once enough of them is dead
//! - **Recovery**: backup files left by an interrupted compaction are resolved on open
//! - **Caches**: two-tier (recent/frequent) caches for open shards and values
//!
//! ## Example Usage
//!
//! ```no_run
//! use triekv::{Config, KeyClass, StorageEngine, Topology};
//! use std::path::PathBuf;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let root = PathBuf::from("./data");
//!     let topology = Topology::new(vec![2, 2], KeyClass::hex())?;
//!     StorageEngine::init(&root, &topology)?;
//!
//!     let mut engine = StorageEngine::open_existing(Config::new(root))?;
//!     engine.put("abcd0001", b"value1")?;
//!     assert_eq!(engine.get("abcd0001")?, Some(b"value1".to_vec()));
//!
//!     engine.delete("abcd0001")?;
//!     engine.trim("ab")?;
//!
//!     for key in engine.keys() {
//!         println!("{}", key?);
//!     }
//!     engine.close()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: Store facade over the name directory, shards and caches
//! - [`names`]: Name directory and shard partition
//! - [`shard`]: Single shard store and crash recovery
//! - [`index`]: Arena radix trie
//! - [`log`]: Index and data log files
//! - [`keyclass`]: Key validators
//! - [`cache`]: Two-tier LRU/LFU cache
//! - [`compaction`]: Garbage collection thresholds
//! - [`metrics`]: Performance metrics collection
//! - [`config`]: Configuration structures
//! - [`error`]: Error types and result aliases

/// CRC32 checksums for log records
pub mod checksum;

/// Configuration structures and validation
pub mod config;

/// Record types and binary codecs for the log files
pub mod entry;

/// Key alphabets and validation
pub mod keyclass;

/// Append-only index and data logs
pub mod log;

/// Arena-backed radix trie
pub mod index;

/// Shard store and recovery
pub mod shard;

/// Garbage collection planning
pub mod compaction;

/// Name directory and shard topology
pub mod names;

/// Two-tier LRU/LFU cache
pub mod cache;

/// Store facade
pub mod engine;

/// Performance metrics collection and reporting
pub mod metrics;

/// Command-line interface
pub mod cli;

/// Error types and result aliases
pub mod error;

// Re-export commonly used types
pub use cache::TieredCache;
pub use config::{Config, GcConfig};
pub use engine::StorageEngine;
pub use error::{Result, StorageError};
pub use index::{RadixTrie, TrieConfig};
pub use keyclass::KeyClass;
pub use names::{NameDirectory, Topology};
pub use shard::{ShardOptions, ShardStore};
