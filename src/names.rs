//! Shard naming: which prefix of a key selects its shard, where that
//! shard's files live, and which shards have ever been written.
//!
//! The directory file starts with a one page [`Superblock`] recording the
//! alphabet and word partition, followed by one `{name}{magic}` entry per
//! discovered shard.

use crate::entry::{Superblock, MAGIC_SIZE, NAMES_MAGIC, PAGE_SIZE};
use crate::error::{Result, StorageError};
use crate::keyclass::KeyClass;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// File name of the name directory inside the store root.
pub const NAMES_FILE: &str = "triekv.names";

/// Upper bound on the number of distinct shard names a topology may allow.
pub const MAX_SHARDS: u64 = 1_000_000;

const INDEX_EXT: &str = "idx";
const DATA_EXT: &str = "dat";

/// How keys map to shards.
///
/// The shard name is the first `word.iter().sum()` characters of a key; each
/// word becomes one path component, so `word = [2, 2]` stores shard `abcd`
/// as `ab/cd.idx` and `ab/cd.dat`.
#[derive(Debug, Clone)]
pub struct Topology {
    word: Vec<u8>,
    key_class: KeyClass,
}

impl Topology {
    /// # Errors
    ///
    /// Returns `ConfigError` if the partition is empty, has a zero segment,
    /// names longer than the key class admits, or more than [`MAX_SHARDS`]
    /// possible shard names.
    pub fn new(word: Vec<u8>, key_class: KeyClass) -> Result<Self> {
        if word.is_empty() || word.len() > u8::MAX as usize {
            return Err(StorageError::ConfigError(format!(
                "word partition must have 1..={} segments, got {}",
                u8::MAX,
                word.len()
            )));
        }
        if word.contains(&0) {
            return Err(StorageError::ConfigError(
                "word segments must be at least 1".to_string()
            ));
        }
        let length: usize = word.iter().map(|&w| w as usize).sum();
        if length > u16::MAX as usize || length > key_class.limit() {
            return Err(StorageError::ConfigError(format!(
                "shard name length {} exceeds the key length limit {}",
                length,
                key_class.limit()
            )));
        }
        if key_class.characters().any(|c| c == '/' || c == '\\') {
            return Err(StorageError::ConfigError(
                "key alphabet cannot contain path separators".to_string()
            ));
        }
        if key_class.alphabet_len() > u8::MAX as usize {
            return Err(StorageError::ConfigError(
                "key alphabet too large for a name directory".to_string()
            ));
        }

        let topology = Self { word, key_class };
        match topology.shard_space() {
            Some(space) if space <= MAX_SHARDS => Ok(topology),
            _ => Err(StorageError::ConfigError(format!(
                "{} characters over a name of length {} allow more than {} shards",
                topology.key_class.alphabet_len(),
                length,
                MAX_SHARDS
            ))),
        }
    }

    pub fn word(&self) -> &[u8] {
        &self.word
    }

    pub fn key_class(&self) -> &KeyClass {
        &self.key_class
    }

    /// Length of every shard name.
    pub fn name_len(&self) -> usize {
        self.word.iter().map(|&w| w as usize).sum()
    }

    /// Number of possible shard names, `None` on overflow.
    pub fn shard_space(&self) -> Option<u64> {
        let exponent = u32::try_from(self.name_len()).ok()?;
        (self.key_class.alphabet_len() as u64).checked_pow(exponent)
    }

    /// Same partition and alphabet; length limits and extra key rules are
    /// not persisted and so not compared.
    pub fn matches(&self, other: &Topology) -> bool {
        self.word == other.word && self.key_class.alphabet() == other.key_class.alphabet()
    }

    fn superblock(&self) -> Superblock {
        Superblock {
            chars: self.key_class.alphabet(),
            words: self.word.clone(),
            length: self.name_len() as u16,
        }
    }

    fn from_superblock(superblock: Superblock) -> Result<Self> {
        let key_class = KeyClass::from_bytes(&superblock.chars)?;
        Self::new(superblock.words, key_class)
    }
}

/// The name directory of one store root.
#[derive(Debug)]
pub struct NameDirectory {
    root: PathBuf,
    path: PathBuf,
    file: File,
    topology: Topology,
    names: BTreeSet<String>,
    readonly: bool,
}

impl NameDirectory {
    /// Creates the name directory for a new store under `root`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInitialized` if `root` already holds one.
    pub fn init(root: &Path, topology: &Topology) -> Result<()> {
        let path = root.join(NAMES_FILE);
        if path.exists() {
            return Err(StorageError::AlreadyInitialized { path });
        }
        fs::create_dir_all(root)?;

        let header = topology.superblock().serialize()?;
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        file.write_all(&header)?;
        file.sync_all()?;

        tracing::info!(
            "Initialized store at {:?} (word {:?}, {} characters)",
            root,
            topology.word(),
            topology.key_class().alphabet_len()
        );
        Ok(())
    }

    /// Opens the name directory under `root` with the topology it was
    /// initialized with.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if there is no directory file, and
    /// `CorruptedData` if a discovery entry is damaged.
    pub fn open(root: &Path, readonly: bool) -> Result<Self> {
        let path = root.join(NAMES_FILE);
        if !path.is_file() {
            return Err(StorageError::NotInitialized { path });
        }

        let mut file = if readonly {
            File::open(&path)?
        } else {
            OpenOptions::new().read(true).append(true).open(&path)?
        };
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let topology = Topology::from_superblock(Superblock::deserialize(&contents)?)?;
        let (names, valid_end) = Self::scan(&path, &topology, &contents)?;
        if valid_end < contents.len() {
            tracing::warn!(
                "Ignoring {} trailing bytes of torn name entry in {:?}",
                contents.len() - valid_end,
                path
            );
            if !readonly {
                file.set_len(valid_end as u64)?;
            }
        }

        tracing::debug!("Name directory {:?} lists {} shards", path, names.len());
        Ok(Self {
            root: root.to_path_buf(),
            path,
            file,
            topology,
            names,
            readonly,
        })
    }

    /// Opens the name directory, insisting on `topology`, whose key class
    /// then replaces the persisted alphabet-only one.
    ///
    /// # Errors
    ///
    /// Returns `TopologyMismatch` if the directory was initialized differently.
    pub fn open_with(root: &Path, topology: Topology, readonly: bool) -> Result<Self> {
        let mut directory = Self::open(root, readonly)?;
        if !directory.topology.matches(&topology) {
            return Err(StorageError::TopologyMismatch(format!(
                "store at {:?} has word {:?} over {:?}, requested word {:?} over {:?}",
                root,
                directory.topology.word(),
                String::from_utf8_lossy(&directory.topology.key_class().alphabet()),
                topology.word(),
                String::from_utf8_lossy(&topology.key_class().alphabet()),
            )));
        }
        directory.topology = topology;
        Ok(directory)
    }

    fn scan(path: &Path, topology: &Topology, contents: &[u8]) -> Result<(BTreeSet<String>, usize)> {
        let entry_size = topology.name_len() + MAGIC_SIZE;
        let mut names = BTreeSet::new();
        let mut offset = PAGE_SIZE;

        while offset + entry_size <= contents.len() {
            let entry = &contents[offset..offset + entry_size];
            let (name, magic) = entry.split_at(topology.name_len());
            let name = std::str::from_utf8(name).ok().filter(|name| {
                magic == NAMES_MAGIC && topology.key_class().check_chars(name)
            });
            match name {
                Some(name) => {
                    names.insert(name.to_string());
                }
                None => {
                    return Err(StorageError::CorruptedData {
                        file: path.to_path_buf(),
                        offset: offset as u64,
                    });
                }
            }
            offset += entry_size;
        }
        Ok((names, offset))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn key_class(&self) -> &KeyClass {
        self.topology.key_class()
    }

    /// Shard name of `key`, after validating the key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for keys the class rejects or that are shorter
    /// than a shard name.
    pub fn name_of<'k>(&self, key: &'k str) -> Result<&'k str> {
        self.key_class().validate(key)?;
        key.get(..self.topology.name_len())
            .ok_or_else(|| StorageError::InvalidKey { key: key.to_string() })
    }

    /// Whether `name` has been registered.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Every registered shard name in ascending order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Records `name` as discovered. Returns `false` if it already was.
    pub fn register(&mut self, name: &str) -> Result<bool> {
        if self.names.contains(name) {
            return Ok(false);
        }
        self.check_name(name)?;
        if self.readonly {
            return Err(StorageError::ReadOnly);
        }

        let mut entry = Vec::with_capacity(name.len() + MAGIC_SIZE);
        entry.extend_from_slice(name.as_bytes());
        entry.extend_from_slice(&NAMES_MAGIC);
        self.file.write_all(&entry)?;
        self.file.sync_all()?;

        self.names.insert(name.to_string());
        tracing::debug!("Registered shard {:?}", name);
        Ok(true)
    }

    /// Index and data log paths of shard `name`, creating its parent
    /// directories unless read-only.
    pub fn shard_paths(&self, name: &str) -> Result<(PathBuf, PathBuf)> {
        self.check_name(name)?;

        let mut dir = self.root.clone();
        let mut start = 0;
        let mut segments = Vec::with_capacity(self.topology.word.len());
        for &width in &self.topology.word {
            let end = start + width as usize;
            segments.push(&name[start..end]);
            start = end;
        }
        let (stem, parents) = match segments.split_last() {
            Some(split) => split,
            None => return Err(StorageError::InvalidKey { key: name.to_string() }),
        };
        for segment in parents {
            // "." and ".." would leave the directory tree
            if segment.bytes().all(|c| c == b'.') {
                dir.push(format!("{}_", segment));
            } else {
                dir.push(segment);
            }
        }
        if !self.readonly {
            fs::create_dir_all(&dir)?;
        }

        Ok((
            dir.join(format!("{}.{}", stem, INDEX_EXT)),
            dir.join(format!("{}.{}", stem, DATA_EXT)),
        ))
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if name.len() == self.topology.name_len() && self.key_class().check_chars(name) {
            Ok(())
        } else {
            Err(StorageError::InvalidKey { key: name.to_string() })
        }
    }
}
